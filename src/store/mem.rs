//! Reference in-memory store. Indexes are BTree maps keyed by the raw
//! index key, so iteration order matches the byte order of keys; for
//! the naming index that is hierarchical order of the sorted name
//! form.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc, Mutex,
    },
};

use crate::{
    bulk::idset::IdSet,
    bulk::key::{Comparator, IndexKey},
    entry::Entry,
    store::{Container, Index, Store},
    Error, Result,
};

/// Default per-index entry-limit, above which posting lists go
/// undefined.
pub const ENTRY_LIMIT: usize = 4096;

struct IndexDefaults {
    entry_limit: Mutex<usize>,
    maintain_count: Mutex<bool>,
    overrides: Mutex<HashMap<IndexKey, (usize, bool)>>,
}

impl IndexDefaults {
    fn resolve(&self, key: &IndexKey) -> (usize, bool) {
        match self.overrides.lock().unwrap().get(key) {
            Some(cfg) => *cfg,
            None => (
                *self.entry_limit.lock().unwrap(),
                *self.maintain_count.lock().unwrap(),
            ),
        }
    }
}

pub struct MemStore {
    containers: Mutex<HashMap<String, Arc<dyn Container>>>,
    defaults: Arc<IndexDefaults>,
}

impl Default for MemStore {
    fn default() -> MemStore {
        MemStore {
            containers: Mutex::new(HashMap::new()),
            defaults: Arc::new(IndexDefaults {
                entry_limit: Mutex::new(ENTRY_LIMIT),
                maintain_count: Mutex::new(false),
                overrides: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Default entry-limit for indexes created after this call.
    pub fn set_entry_limit(&self, limit: usize) -> &Self {
        *self.defaults.entry_limit.lock().unwrap() = limit;
        self
    }

    pub fn set_maintain_count(&self, count: bool) -> &Self {
        *self.defaults.maintain_count.lock().unwrap() = count;
        self
    }

    /// Per-index override, engine configuration in a real store.
    pub fn set_index_config(&self, key: IndexKey, limit: usize, count: bool) -> &Self {
        self.defaults.overrides.lock().unwrap().insert(key, (limit, count));
        self
    }
}

impl Store for MemStore {
    fn open(&self, name: &str) -> Result<Arc<dyn Container>> {
        let mut containers = self.containers.lock().unwrap();
        match containers.get(name) {
            Some(c) => Ok(Arc::clone(c)),
            None => {
                let c = Arc::new(MemContainer {
                    name: Mutex::new(name.to_string()),
                    defaults: Arc::clone(&self.defaults),
                    indexes: Mutex::new(HashMap::new()),
                    entries: Mutex::new(BTreeMap::new()),
                    locked: Mutex::new(false),
                });
                containers.insert(name.to_string(), c.clone());
                Ok(c)
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Container>> {
        self.containers.lock().unwrap().get(name).map(Arc::clone)
    }

    fn register(&self, name: &str, container: Arc<dyn Container>) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(name) {
            return err_at!(StoreFail, msg: "container {:?} already registered", name);
        }
        containers.insert(name.to_string(), container);
        Ok(())
    }

    fn unregister(&self, name: &str) -> Result<Arc<dyn Container>> {
        match self.containers.lock().unwrap().remove(name) {
            Some(c) => Ok(c),
            None => err_at!(StoreFail, msg: "container {:?} not registered", name),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(to) {
            return err_at!(StoreFail, msg: "container {:?} already registered", to);
        }
        match containers.remove(from) {
            Some(c) => {
                c.set_name(to)?;
                containers.insert(to.to_string(), c);
                Ok(())
            }
            None => err_at!(StoreFail, msg: "container {:?} not registered", from),
        }
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.unregister(name).map(|_| ())
    }
}

pub struct MemContainer {
    name: Mutex<String>,
    defaults: Arc<IndexDefaults>,
    indexes: Mutex<HashMap<IndexKey, Arc<MemIndex>>>,
    entries: Mutex<BTreeMap<u64, Entry>>,
    locked: Mutex<bool>,
}

impl Container for MemContainer {
    fn to_name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    fn set_name(&self, name: &str) -> Result<()> {
        *self.name.lock().unwrap() = name.to_string();
        Ok(())
    }

    fn index(&self, key: &IndexKey) -> Result<Arc<dyn Index>> {
        let mut indexes = self.indexes.lock().unwrap();
        match indexes.get(key) {
            Some(index) => Ok(Arc::clone(index) as Arc<dyn Index>),
            None => {
                let (limit, count) = self.defaults.resolve(key);
                let index = Arc::new(MemIndex {
                    limit,
                    count,
                    cmp: key.comparator(),
                    map: Mutex::new(BTreeMap::new()),
                    trusted: AtomicBool::new(true),
                });
                indexes.insert(key.clone(), index.clone());
                Ok(index)
            }
        }
    }

    fn indexes(&self) -> Vec<(IndexKey, Arc<dyn Index>)> {
        self.indexes
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v) as Arc<dyn Index>))
            .collect()
    }

    fn put_entry(&self, id: u64, entry: &Entry) -> Result<()> {
        self.entries.lock().unwrap().insert(id, entry.clone());
        Ok(())
    }

    fn entry(&self, id: u64) -> Result<Option<Entry>> {
        Ok(self.entries.lock().unwrap().get(&id).cloned())
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = (u64, Entry)> + Send>> {
        let snap: Vec<(u64, Entry)> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(id, e)| (*id, e.clone()))
            .collect();
        Ok(Box::new(snap.into_iter()))
    }

    fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn last_entry_id(&self) -> Result<u64> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.keys().next_back().copied().unwrap_or(0))
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock().unwrap().clear();
        for (_, index) in self.indexes.lock().unwrap().iter() {
            index.map.lock().unwrap().clear();
        }
        Ok(())
    }

    fn lock(&self) -> Result<()> {
        let mut locked = self.locked.lock().unwrap();
        if *locked {
            return err_at!(StoreFail, msg: "container {:?} already locked", self.to_name());
        }
        *locked = true;
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        *self.locked.lock().unwrap() = false;
        Ok(())
    }
}

pub struct MemIndex {
    limit: usize,
    count: bool,
    cmp: Comparator,
    map: Mutex<BTreeMap<Vec<u8>, IdSet>>,
    trusted: AtomicBool,
}

impl Index for MemIndex {
    fn insert(&self, key: &[u8], ids: &IdSet) -> Result<()> {
        let mut map = self.map.lock().unwrap();
        let set = map
            .entry(key.to_vec())
            .or_insert_with(|| IdSet::new(self.limit, self.count));
        set.merge(ids);
        Ok(())
    }

    fn delete(&self, key: &[u8], ids: &IdSet) -> Result<()> {
        let mut map = self.map.lock().unwrap();
        let ids = match ids.as_ids() {
            Some(ids) => ids,
            // an undefined delete-set clears the key.
            None => {
                map.remove(key);
                return Ok(());
            }
        };
        let drop_key = match map.get_mut(key) {
            Some(set) => {
                for id in ids {
                    set.remove(*id);
                }
                set.is_empty()
            }
            None => false,
        };
        if drop_key {
            map.remove(key);
        }
        Ok(())
    }

    fn put(&self, key: &[u8], id: u64) -> Result<()> {
        let set = IdSet::from_ids(self.limit, self.count, &[id]);
        self.map.lock().unwrap().insert(key.to_vec(), set);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<IdSet>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn cursor(&self) -> Result<Box<dyn Iterator<Item = (Vec<u8>, IdSet)> + Send>> {
        let snap: Vec<(Vec<u8>, IdSet)> = self
            .map
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(snap.into_iter()))
    }

    fn entry_limit(&self) -> usize {
        self.limit
    }

    fn maintain_count(&self) -> bool {
        self.count
    }

    fn comparator(&self) -> Comparator {
        self.cmp
    }

    fn is_trusted(&self) -> bool {
        self.trusted.load(SeqCst)
    }

    fn set_trusted(&self, trusted: bool) -> Result<()> {
        self.trusted.store(trusted, SeqCst);
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.map.lock().unwrap().len())
    }
}

#[cfg(test)]
#[path = "mem_test.rs"]
mod mem_test;
