use std::convert::TryFrom;

use super::*;
use crate::name::Name;

#[test]
fn test_container_registry() {
    let store = MemStore::new();
    let c = store.open("o=x").unwrap();
    assert_eq!(c.to_name(), "o=x");
    assert!(store.lookup("o=x").is_some());

    let shadow = store.open("o=x;import-tmp").unwrap();
    assert!(store.register("o=x;import-tmp", shadow).is_err());

    store.remove("o=x").unwrap();
    assert!(store.lookup("o=x").is_none());
    store.rename("o=x;import-tmp", "o=x").unwrap();
    let c = store.lookup("o=x").unwrap();
    assert_eq!(c.to_name(), "o=x");

    c.lock().unwrap();
    assert!(c.lock().is_err());
    c.unlock().unwrap();
    c.lock().unwrap();
}

#[test]
fn test_index_ops() {
    let store = MemStore::new();
    store.set_index_config(IndexKey::new("cn", crate::bulk::key::IndexType::Equality), 2, true);
    let c = store.open("o=x").unwrap();

    let index = c
        .index(&IndexKey::new("cn", crate::bulk::key::IndexType::Equality))
        .unwrap();
    assert_eq!(index.entry_limit(), 2);
    assert!(index.maintain_count());
    assert!(index.is_trusted());

    index.insert(b"alice", &IdSet::from_ids(2, true, &[1])).unwrap();
    index.insert(b"alice", &IdSet::from_ids(2, true, &[2])).unwrap();
    assert_eq!(index.get(b"alice").unwrap().unwrap().as_ids().unwrap(), &[1, 2]);

    // limit crossing inside the store.
    index.insert(b"alice", &IdSet::from_ids(2, true, &[3])).unwrap();
    let set = index.get(b"alice").unwrap().unwrap();
    assert!(!set.is_defined());
    assert_eq!(set.count(), Some(3));

    index.delete(b"bob", &IdSet::from_ids(2, true, &[7])).unwrap();
    index.insert(b"bob", &IdSet::from_ids(2, true, &[7, 9])).unwrap();
    index.delete(b"bob", &IdSet::from_ids(2, true, &[9])).unwrap();
    assert_eq!(index.get(b"bob").unwrap().unwrap().as_ids().unwrap(), &[7]);

    index.set_trusted(false).unwrap();
    assert!(!index.is_trusted());

    assert_eq!(index.len().unwrap(), 2);
    let keys: Vec<Vec<u8>> = index.cursor().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"alice".to_vec(), b"bob".to_vec()]);
}

#[test]
fn test_entry_table() {
    let store = MemStore::new();
    let c = store.open("o=x").unwrap();

    let mut e1 = crate::entry::Entry::new(Name::try_from("o=x").unwrap());
    e1.add_value("objectclass", b"organization");
    let mut e2 = crate::entry::Entry::new(Name::try_from("a,o=x").unwrap());
    e2.add_value("cn", b"a");

    c.put_entry(1, &e1).unwrap();
    c.put_entry(2, &e2).unwrap();
    assert_eq!(c.entry_count(), 2);
    assert_eq!(c.entry(2).unwrap().unwrap(), e2);
    assert_eq!(c.entry(3).unwrap(), None);

    let ids: Vec<u64> = c.entries().unwrap().map(|(id, _)| id).collect();
    assert_eq!(ids, vec![1, 2]);

    c.clear().unwrap();
    assert_eq!(c.entry_count(), 0);
}
