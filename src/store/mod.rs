//! Module `store` define the contract between the import engine and
//! the backing key-value store.
//!
//! The engine never touches the store's transactional machinery. It
//! talks to three seams: a [Store] managing named containers, one
//! [Container] per suffix holding the entry table and the indexes, and
//! one [Index] per (attribute, kind) stream accepting bulk inserts.
//! The store is assumed exclusive to this process for the duration of
//! an import.
//!
//! A reference in-memory implementation lives in [mem]; it backs the
//! test suite and small rebuild jobs.

use std::sync::Arc;

use crate::{
    bulk::idset::IdSet,
    bulk::key::{Comparator, IndexKey},
    entry::Entry,
    Result,
};

pub mod mem;

/// One on-disk index within a container.
pub trait Index: Send + Sync {
    /// Bulk-insert a posting list, merging with the key's existing
    /// list under the index's entry-limit.
    fn insert(&self, key: &[u8], ids: &IdSet) -> Result<()>;

    /// Remove ids from the key's posting list.
    fn delete(&self, key: &[u8], ids: &IdSet) -> Result<()>;

    /// Overwrite the key with a single id, naming-index style.
    fn put(&self, key: &[u8], id: u64) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<IdSet>>;

    /// Snapshot cursor over (key, posting-list), in key order.
    fn cursor(&self) -> Result<Box<dyn Iterator<Item = (Vec<u8>, IdSet)> + Send>>;

    fn entry_limit(&self) -> usize;

    fn maintain_count(&self) -> bool;

    fn comparator(&self) -> Comparator;

    fn is_trusted(&self) -> bool;

    /// A rebuilt index stays not-trusted until the import commits.
    fn set_trusted(&self, trusted: bool) -> Result<()>;

    fn len(&self) -> Result<usize>;
}

/// One container, owning the entry table and the indexes of one
/// suffix.
pub trait Container: Send + Sync {
    fn to_name(&self) -> String;

    /// Store-internal hook used by [Store::rename].
    fn set_name(&self, name: &str) -> Result<()>;

    /// Open-or-create the index for `key`.
    fn index(&self, key: &IndexKey) -> Result<Arc<dyn Index>>;

    /// The indexes opened so far.
    fn indexes(&self) -> Vec<(IndexKey, Arc<dyn Index>)>;

    fn put_entry(&self, id: u64, entry: &Entry) -> Result<()>;

    fn entry(&self, id: u64) -> Result<Option<Entry>>;

    /// Snapshot cursor over the entry table in id order. Ids are
    /// assigned in admission order, so parents stream before their
    /// children.
    fn entries(&self) -> Result<Box<dyn Iterator<Item = (u64, Entry)> + Send>>;

    fn entry_count(&self) -> usize;

    /// Greatest id in the entry table, 0 when empty. An appending
    /// import continues id assignment from here.
    fn last_entry_id(&self) -> Result<u64>;

    /// Drop all entries and all index content, keep the handles valid.
    fn clear(&self) -> Result<()>;

    /// Advisory exclusive lock held across a container swap.
    fn lock(&self) -> Result<()>;

    fn unlock(&self) -> Result<()>;
}

/// The store: a registry of named containers.
pub trait Store: Send + Sync {
    /// Open the container `name`, creating and registering it on first
    /// use.
    fn open(&self, name: &str) -> Result<Arc<dyn Container>>;

    fn lookup(&self, name: &str) -> Option<Arc<dyn Container>>;

    fn register(&self, name: &str, container: Arc<dyn Container>) -> Result<()>;

    fn unregister(&self, name: &str) -> Result<Arc<dyn Container>>;

    /// Move a registered container to a new canonical name.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Unregister and delete a container.
    fn remove(&self, name: &str) -> Result<()>;
}
