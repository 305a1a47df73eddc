//! Module `schema` resolve attribute types and derive index keys.
//!
//! For every (attribute, index-kind) pair the schema supplies a keyer
//! turning attribute values into the byte-string keys of that index.
//! Presence of a keyer decides whether records are emitted at all. The
//! resolver is plain data injected into the orchestrator; nothing in
//! this module is process-global state.

use lazy_static::lazy_static;

use std::collections::{BTreeSet, HashMap};

use crate::bulk::key::{IndexKey, IndexType};

/// Default key length for substring indexes.
pub const SUBSTRING_LEN: usize = 3;

/// The single key under which presence is recorded.
pub const PRESENCE_KEY: &[u8] = b"+";

/// Keyer signature for the extensible index kinds. Implementations are
/// supplied by deployments that carry matching-rule plugins.
pub type ExtKeyer = fn(&[Vec<u8>]) -> Vec<Vec<u8>>;

/// Attribute type: which index kinds are maintained for the attribute
/// and how their keys are derived.
#[derive(Clone)]
pub struct AttrType {
    pub name: String,
    pub kinds: Vec<IndexType>,
    pub substr_len: usize,
    ext_substring: Option<ExtKeyer>,
    ext_shared: Option<ExtKeyer>,
}

impl AttrType {
    pub fn new(name: &str, kinds: &[IndexType]) -> AttrType {
        AttrType {
            name: name.trim().to_lowercase(),
            kinds: kinds.to_vec(),
            substr_len: SUBSTRING_LEN,
            ext_substring: None,
            ext_shared: None,
        }
    }

    pub fn set_substr_len(mut self, n: usize) -> AttrType {
        self.substr_len = n.max(1);
        self
    }

    pub fn set_ext_substring(mut self, keyer: ExtKeyer) -> AttrType {
        self.ext_substring = Some(keyer);
        if !self.kinds.contains(&IndexType::ExtSubstring) {
            self.kinds.push(IndexType::ExtSubstring);
        }
        self
    }

    pub fn set_ext_shared(mut self, keyer: ExtKeyer) -> AttrType {
        self.ext_shared = Some(keyer);
        if !self.kinds.contains(&IndexType::ExtShared) {
            self.kinds.push(IndexType::ExtShared);
        }
        self
    }

    /// The [IndexKey] for one maintained kind of this attribute.
    pub fn to_index_key(&self, kind: IndexType) -> IndexKey {
        let key = IndexKey::new(&self.name, kind);
        match kind {
            IndexType::Substring => key.set_substr_len(self.substr_len),
            _ => key,
        }
    }

    /// Derive the index keys of `kind` from attribute values. An empty
    /// return means no records are emitted for this (attribute, kind).
    pub fn index_keys(&self, kind: IndexType, values: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut keys: BTreeSet<Vec<u8>> = BTreeSet::new();
        match kind {
            IndexType::Equality | IndexType::Ordering => {
                for value in values {
                    keys.insert(normalize_value(value));
                }
            }
            IndexType::Presence => {
                if !values.is_empty() {
                    keys.insert(PRESENCE_KEY.to_vec());
                }
            }
            IndexType::Substring => {
                for value in values {
                    let norm = normalize_value(value);
                    if norm.len() < self.substr_len {
                        keys.insert(norm);
                    } else {
                        for win in norm.windows(self.substr_len) {
                            keys.insert(win.to_vec());
                        }
                    }
                }
            }
            IndexType::Approximate => {
                for value in values {
                    keys.insert(phonetic_key(&normalize_value(value)));
                }
            }
            IndexType::ExtSubstring => {
                if let Some(keyer) = self.ext_substring {
                    keys.extend(keyer(values));
                }
            }
            IndexType::ExtShared => {
                if let Some(keyer) = self.ext_shared {
                    keys.extend(keyer(values));
                }
            }
            IndexType::Naming | IndexType::Children | IndexType::Subtree => (),
        }
        keys.into_iter().filter(|k| !k.is_empty()).collect()
    }
}

fn normalize_value(value: &[u8]) -> Vec<u8> {
    let trimmed: Vec<u8> = {
        let begin = value.iter().position(|b| !b.is_ascii_whitespace());
        let end = value.iter().rposition(|b| !b.is_ascii_whitespace());
        match (begin, end) {
            (Some(b), Some(e)) => value[b..=e].to_vec(),
            _ => vec![],
        }
    };
    trimmed.to_ascii_lowercase()
}

// Soundex-style folding for the approximate index.
fn phonetic_key(value: &[u8]) -> Vec<u8> {
    let mut letters = value.iter().filter(|b| b.is_ascii_alphabetic());
    let first = match letters.next() {
        Some(b) => b.to_ascii_uppercase(),
        None => return vec![],
    };

    let class = |b: u8| -> Option<u8> {
        match b {
            b'b' | b'f' | b'p' | b'v' => Some(b'1'),
            b'c' | b'g' | b'j' | b'k' | b'q' | b's' | b'x' | b'z' => Some(b'2'),
            b'd' | b't' => Some(b'3'),
            b'l' => Some(b'4'),
            b'm' | b'n' => Some(b'5'),
            b'r' => Some(b'6'),
            _ => None,
        }
    };

    let mut key = vec![first];
    let mut prev = class(first.to_ascii_lowercase());
    for b in letters {
        let code = class(*b);
        if let Some(code) = code {
            if Some(code) != prev {
                key.push(code);
            }
        }
        prev = code;
        if key.len() == 4 {
            break;
        }
    }
    while key.len() < 4 {
        key.push(b'0');
    }
    key
}

lazy_static! {
    static ref DEFAULT_ATTRS: Vec<AttrType> = {
        use IndexType::{Approximate, Equality, Ordering, Presence, Substring};

        vec![
            AttrType::new("objectclass", &[Equality, Presence]),
            AttrType::new("cn", &[Equality, Presence, Substring, Approximate]),
            AttrType::new("sn", &[Equality, Presence, Substring, Approximate]),
            AttrType::new("uid", &[Equality, Presence]),
            AttrType::new("mail", &[Equality, Presence, Substring]),
            AttrType::new("telephonenumber", &[Equality, Substring]),
            AttrType::new("description", &[Presence]),
            AttrType::new("createtimestamp", &[Equality, Ordering]),
        ]
    };
}

/// The schema resolver: attribute name to [AttrType].
#[derive(Clone)]
pub struct Schema {
    attrs: HashMap<String, AttrType>,
}

impl Default for Schema {
    fn default() -> Schema {
        let mut schema = Schema::new();
        for at in DEFAULT_ATTRS.iter() {
            schema.set_attr(at.clone());
        }
        schema
    }
}

impl Schema {
    pub fn new() -> Schema {
        Schema {
            attrs: HashMap::new(),
        }
    }

    pub fn set_attr(&mut self, at: AttrType) -> &mut Self {
        self.attrs.insert(at.name.clone(), at);
        self
    }

    pub fn lookup(&self, attr: &str) -> Option<&AttrType> {
        self.attrs.get(attr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttrType> {
        self.attrs.values()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod schema_test;
