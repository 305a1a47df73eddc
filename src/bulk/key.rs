//! Module `key` identify the index streams flowing through the import
//! pipeline.
//!
//! Every record carries a 32-bit `index-id` resolving to one on-disk
//! index; the id is assigned at suffix initialization and stays fixed
//! for the whole import. The [IndexKey] behind an id names the index
//! in stable, filesystem-safe form and is used for the run-file name.

use std::{
    cmp,
    hash::{Hash, Hasher},
};

/// Index kind. Dispatch over kinds is by plain `match`, there is one
/// comparator, one keyer and one entry-limit lookup per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    Naming,
    Children,
    Subtree,
    Equality,
    Presence,
    Substring,
    Ordering,
    Approximate,
    ExtSubstring,
    ExtShared,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        use IndexType::*;

        match self {
            Naming => "naming",
            Children => "children",
            Subtree => "subtree",
            Equality => "equality",
            Presence => "presence",
            Substring => "substring",
            Ordering => "ordering",
            Approximate => "approximate",
            ExtSubstring => "ext_substring",
            ExtShared => "ext_shared",
        }
    }

    /// The entry-tree kinds are maintained by the engine itself, not
    /// derived from attribute values.
    pub fn is_entry_tree(&self) -> bool {
        matches!(
            self,
            IndexType::Naming | IndexType::Children | IndexType::Subtree
        )
    }

    pub fn comparator(&self) -> Comparator {
        match self {
            IndexType::Naming => Comparator::Naming,
            _ => Comparator::Binary,
        }
    }
}

/// Identifier tagging an (attribute, index-kind) stream. Equality and
/// hashing use the attribute and the kind; the substring key-length
/// hint rides along without affecting identity.
#[derive(Clone, Debug, Eq)]
pub struct IndexKey {
    pub attr: String,
    pub kind: IndexType,
    pub substr_len: Option<usize>,
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.attr == other.attr && self.kind == other.kind
    }
}

impl Hash for IndexKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.attr.hash(state);
        self.kind.hash(state);
    }
}

impl IndexKey {
    pub fn new(attr: &str, kind: IndexType) -> IndexKey {
        IndexKey {
            attr: attr.trim().to_lowercase(),
            kind,
            substr_len: None,
        }
    }

    pub fn set_substr_len(mut self, n: usize) -> IndexKey {
        self.substr_len = Some(n);
        self
    }

    pub fn naming() -> IndexKey {
        IndexKey::new("dn", IndexType::Naming)
    }

    pub fn children() -> IndexKey {
        IndexKey::new("dn", IndexType::Children)
    }

    pub fn subtree() -> IndexKey {
        IndexKey::new("dn", IndexType::Subtree)
    }

    /// Stable filesystem-safe name `"<attr>.<kind>"`, also the run-file
    /// name for this index's spill runs.
    pub fn name(&self) -> String {
        let attr: String = self
            .attr
            .chars()
            .map(|ch| match ch {
                'a'..='z' | '0'..='9' | '-' => ch,
                _ => '_',
            })
            .collect();
        format!("{}.{}", attr, self.kind.as_str())
    }

    pub fn comparator(&self) -> Comparator {
        self.kind.comparator()
    }
}

/// Key ordering for one index. `Binary` is plain byte order. `Naming`
/// orders sorted-form names component-wise from the root; because
/// components are NUL-terminated the result coincides with byte order,
/// it is implemented structurally to keep the contract explicit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Comparator {
    Binary,
    Naming,
}

impl Comparator {
    pub fn compare(&self, a: &[u8], b: &[u8]) -> cmp::Ordering {
        match self {
            Comparator::Binary => a.cmp(b),
            Comparator::Naming => {
                let mut xs = a.split(|b| *b == crate::name::TERM).filter(|s| !s.is_empty());
                let mut ys = b.split(|b| *b == crate::name::TERM).filter(|s| !s.is_empty());
                loop {
                    match (xs.next(), ys.next()) {
                        (Some(x), Some(y)) => match x.cmp(y) {
                            cmp::Ordering::Equal => continue,
                            o => break o,
                        },
                        (None, Some(_)) => break cmp::Ordering::Less,
                        (Some(_), None) => break cmp::Ordering::Greater,
                        (None, None) => break cmp::Ordering::Equal,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "key_test.rs"]
mod key_test;
