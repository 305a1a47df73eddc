//! Module `entry` define the decoded directory entry and the entry
//! stream consumed by the import workers.

use std::collections::VecDeque;

use crate::{name::Name, Result};

/// One attribute of an entry, holding one or more raw values.
#[derive(Clone, Debug, PartialEq)]
pub struct Attr {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

/// A decoded directory entry: a hierarchical name and its attribute
/// multi-values. Produced by an [EntrySource], immutable thereafter.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    name: Name,
    attrs: Vec<Attr>,
}

impl Entry {
    pub fn new(name: Name) -> Entry {
        Entry { name, attrs: vec![] }
    }

    /// Add an attribute value, creating the attribute on first use.
    /// Attribute names are normalized to lower-case.
    pub fn add_value(&mut self, attr: &str, value: &[u8]) -> &mut Self {
        let attr = attr.trim().to_lowercase();
        match self.attrs.iter_mut().find(|a| a.name == attr) {
            Some(a) => a.values.push(value.to_vec()),
            None => self.attrs.push(Attr {
                name: attr,
                values: vec![value.to_vec()],
            }),
        }
        self
    }

    pub fn as_name(&self) -> &Name {
        &self.name
    }

    pub fn to_name(&self) -> Name {
        self.name.clone()
    }

    pub fn as_attrs(&self) -> &[Attr] {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name == name)
    }
}

/// Item produced by an [EntrySource]. A malformed item carries the
/// parser's diagnostic; it is counted as rejected and the import moves
/// on to the next item.
#[derive(Clone, Debug)]
pub enum Sourced {
    Entry(Box<Entry>),
    Malformed(String),
    Eof,
}

/// The entry stream. Import workers contend over a single source
/// behind a mutex; ordering across workers is not significant because
/// every downstream stage re-sorts.
pub trait EntrySource: Send {
    fn next_entry(&mut self) -> Result<Sourced>;
}

/// In-memory entry source, the reference source for tests and small
/// rebuild jobs.
pub struct VecSource {
    items: VecDeque<Sourced>,
}

impl VecSource {
    pub fn new(entries: Vec<Entry>) -> VecSource {
        let items = entries
            .into_iter()
            .map(|e| Sourced::Entry(Box::new(e)))
            .collect();
        VecSource { items }
    }

    /// Queue a malformed item, as a parser would on a bad record.
    pub fn push_malformed(&mut self, msg: &str) -> &mut Self {
        self.items.push_back(Sourced::Malformed(msg.to_string()));
        self
    }
}

impl EntrySource for VecSource {
    fn next_entry(&mut self) -> Result<Sourced> {
        Ok(self.items.pop_front().unwrap_or(Sourced::Eof))
    }
}
