//! Module `name` implement the name algebra for hierarchical entry names.
//!
//! A name is a sequence of components ordered root-last in its textual
//! form, `"c,b,o=x"` names the entry `c` under `b` under the suffix
//! `o=x`. Components are normalized to trimmed lower-case form.
//!
//! The naming index does not store the textual form. It stores the
//! _sorted_ form produced by [Name::to_sorted_bytes]: components are
//! laid out root-first, each terminated by a NUL byte. Under plain byte
//! ordering of the sorted form an ancestor is a strict prefix of every
//! descendant, hence descendants immediately follow their ancestor and a
//! subtree is one contiguous key range. Both the naming-index comparator
//! and the parent-table in the naming merger rely on this layout.

use std::{cmp, convert::TryFrom, fmt, result};

use crate::{Error, Result};

/// Component terminator in the sorted form. Never occurs inside a
/// normalized component.
pub const TERM: u8 = 0x00;

/// Hierarchical entry name. Components are kept leaf-first, matching
/// the textual root-last form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Name {
    comps: Vec<String>,
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.comps.join(","))
    }
}

impl TryFrom<&str> for Name {
    type Error = Error;

    fn try_from(text: &str) -> Result<Name> {
        let mut comps = vec![];
        for part in text.split(',') {
            let comp = normalize(part);
            if comp.is_empty() {
                return err_at!(DecodeFail, msg: "empty component in name {:?}", text);
            }
            comps.push(comp);
        }
        Ok(Name { comps })
    }
}

fn normalize(part: &str) -> String {
    part.trim()
        .chars()
        .filter(|ch| *ch != char::from(TERM))
        .collect::<String>()
        .to_lowercase()
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        let (a, b) = (self.comps.iter().rev(), other.comps.iter().rev());
        for (x, y) in a.zip(b) {
            match x.cmp(y) {
                cmp::Ordering::Equal => continue,
                o => return o,
            }
        }
        self.comps.len().cmp(&other.comps.len())
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Name {
    /// Number of components in this name.
    pub fn len(&self) -> usize {
        self.comps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comps.is_empty()
    }

    /// Immediate parent, `None` for a single-component name.
    pub fn parent(&self) -> Option<Name> {
        match self.comps.len() {
            0 | 1 => None,
            _ => Some(Name {
                comps: self.comps[1..].to_vec(),
            }),
        }
    }

    /// True when `other` is a strict descendant of this name.
    pub fn is_ancestor_of(&self, other: &Name) -> bool {
        let (n, m) = (self.comps.len(), other.comps.len());
        m > n && other.comps[m - n..] == self.comps[..]
    }

    /// True when this name is `base` itself or falls under it.
    pub fn is_within(&self, base: &Name) -> bool {
        self == base || base.is_ancestor_of(self)
    }

    /// Immediate parent, provided both this name and the parent fall
    /// strictly under-or-at `base`. The base entry itself has no parent
    /// within the base.
    pub fn parent_within_base(&self, base: &Name) -> Option<Name> {
        if base.is_ancestor_of(self) {
            self.parent()
        } else {
            None
        }
    }

    /// Strict ancestors of this name within `base`, nearest first,
    /// ending with `base` itself.
    pub fn ancestors_within_base(&self, base: &Name) -> Vec<Name> {
        let mut ancestors = vec![];
        let mut cursor = self.parent_within_base(base);
        while let Some(name) = cursor {
            cursor = if name == *base {
                None
            } else {
                name.parent_within_base(base)
            };
            ancestors.push(name);
        }
        ancestors
    }

    /// Serialize to the sorted form: components root-first, each
    /// NUL-terminated. Byte order of the sorted form is hierarchical
    /// order, refer to the module documentation.
    pub fn to_sorted_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.comps.iter().map(|c| c.len() + 1).sum());
        for comp in self.comps.iter().rev() {
            out.extend_from_slice(comp.as_bytes());
            out.push(TERM);
        }
        out
    }

    /// Reconstruct a name from its sorted form.
    pub fn from_sorted_bytes(key: &[u8]) -> Result<Name> {
        match key.last() {
            Some(b) if *b == TERM => (),
            _ => return err_at!(DecodeFail, msg: "sorted name missing terminator"),
        }
        let mut comps = vec![];
        for seg in key.split(|b| *b == TERM) {
            if seg.is_empty() {
                continue;
            }
            let comp = err_at!(FailConvert, std::str::from_utf8(seg))?;
            comps.push(comp.to_string());
        }
        if comps.is_empty() {
            return err_at!(DecodeFail, msg: "empty sorted name");
        }
        comps.reverse();
        Ok(Name { comps })
    }
}

/// Structural trimming on the sorted form: the sorted-form key of the
/// immediate parent, `None` for a single-component key.
pub fn parent_sorted_bytes(key: &[u8]) -> Option<&[u8]> {
    match key.last() {
        Some(b) if *b == TERM => (),
        _ => return None,
    }
    key[..key.len() - 1]
        .iter()
        .rposition(|b| *b == TERM)
        .map(|pos| &key[..pos + 1])
}

/// True when sorted-form `a` names an ancestor of sorted-form `b`.
/// In the sorted form, ancestry is strict-prefix containment.
pub fn is_ancestor_sorted_bytes(a: &[u8], b: &[u8]) -> bool {
    b.len() > a.len() && b.starts_with(a)
}

#[cfg(test)]
#[path = "name_test.rs"]
mod name_test;
