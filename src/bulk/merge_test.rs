use rand::{prelude::random, rngs::SmallRng, seq::SliceRandom, SeedableRng};

use std::convert::TryFrom;

use super::*;
use crate::{
    bulk::key::{IndexKey, IndexType},
    name::Name,
    store::{mem::MemStore, Container, Store},
};

fn write_runs(loc: &ffi::OsStr, runs: &[Vec<SpillRec>]) -> Vec<RunSpan> {
    let mut file = vec![];
    let mut spans = vec![];
    for run in runs {
        let begin = file.len() as u64;
        for rec in run {
            rec.encode(&mut file);
        }
        spans.push(RunSpan {
            begin,
            end: file.len() as u64,
        });
    }
    fs::write(loc, &file).unwrap();
    spans
}

fn rec(key: &[u8], ins: &[u64], del: &[u64]) -> SpillRec {
    SpillRec {
        index_id: 0,
        key: key.to_vec(),
        undefined: false,
        ins: ins.to_vec(),
        del: del.to_vec(),
    }
}

#[test]
fn test_merge_aggregation() {
    let dir = std::env::temp_dir().join("test_merge_aggregation");
    fs::create_dir_all(&dir).unwrap();
    let loc = dir.join("cn.equality.run").into_os_string();

    let store = MemStore::new();
    store.set_index_config(IndexKey::new("cn", IndexType::Equality), 100, false);
    let container = store.open("o=x").unwrap();
    let index = container.index(&IndexKey::new("cn", IndexType::Equality)).unwrap();

    let runs = vec![
        vec![rec(b"a", &[1, 3], &[]), rec(b"c", &[5], &[])],
        vec![rec(b"a", &[2], &[]), rec(b"b", &[4], &[4]), rec(b"d", &[9], &[7])],
    ];
    let spans = write_runs(&loc, &runs);

    // pre-existing id for "d"; the import's delete must remove it.
    index.insert(b"d", &IdSet::from_ids(100, false, &[7])).unwrap();

    let job = MergeJob {
        index_id: 0,
        name: "cn.equality".to_string(),
        loc: loc.clone(),
        spans,
        index: index.clone(),
        cmp: Comparator::Binary,
        read_ahead: 64,
        naming: false,
    };
    let stats = merge_task(job, Arc::new(AtomicBool::new(false))).unwrap();
    assert_eq!(stats.keys, 4);

    assert_eq!(index.get(b"a").unwrap().unwrap().as_ids().unwrap(), &[1, 2, 3]);
    // insert-then-delete within the import nets to nothing.
    assert_eq!(index.get(b"b").unwrap(), None);
    assert_eq!(index.get(b"c").unwrap().unwrap().as_ids().unwrap(), &[5]);
    // the delete removed the pre-existing id, the insert survived.
    assert_eq!(index.get(b"d").unwrap().unwrap().as_ids().unwrap(), &[9]);

    // run file deleted on success.
    assert!(!std::path::Path::new(&loc).exists());
}

#[test]
fn test_merge_undefined_spill() {
    let dir = std::env::temp_dir().join("test_merge_undefined_spill");
    fs::create_dir_all(&dir).unwrap();
    let loc = dir.join("cn.presence.run").into_os_string();

    let store = MemStore::new();
    store.set_index_config(IndexKey::new("cn", IndexType::Presence), 3, true);
    let container = store.open("o=x").unwrap();
    let index = container.index(&IndexKey::new("cn", IndexType::Presence)).unwrap();

    let runs = vec![
        vec![rec(b"+", &[1, 2], &[])],
        vec![rec(b"+", &[3, 4, 5], &[])],
    ];
    let spans = write_runs(&loc, &runs);

    let job = MergeJob {
        index_id: 0,
        name: "cn.presence".to_string(),
        loc,
        spans,
        index: index.clone(),
        cmp: Comparator::Binary,
        read_ahead: 64,
        naming: false,
    };
    merge_task(job, Arc::new(AtomicBool::new(false))).unwrap();

    let set = index.get(b"+").unwrap().unwrap();
    assert!(!set.is_defined());
    assert_eq!(set.count(), Some(5));
}

fn sorted_key(text: &str) -> Vec<u8> {
    Name::try_from(text).unwrap().to_sorted_bytes()
}

#[test]
fn test_naming_merge_reconstruction() {
    let seed: u128 = random();
    println!("test_naming_merge_reconstruction {}", seed);
    let mut full_seed = [0u8; 32];
    let seed_bytes = seed.to_le_bytes();
    full_seed[..16].copy_from_slice(&seed_bytes);
    full_seed[16..].copy_from_slice(&seed_bytes);
    let mut rng = SmallRng::from_seed(full_seed);

    let dir = std::env::temp_dir().join("test_naming_merge_reconstruction");
    fs::create_dir_all(&dir).unwrap();
    let loc = dir.join("dn.naming.run").into_os_string();

    let store = MemStore::new();
    let container = store.open("o=x").unwrap();
    let naming = container.index(&IndexKey::naming()).unwrap();
    let children = container.index(&IndexKey::children()).unwrap();
    let subtree = container.index(&IndexKey::subtree()).unwrap();

    // ids follow stream order; the key order is hierarchical. The
    // dangling entry has no admitted parent anywhere.
    let mut entries = vec![
        (sorted_key("o=x"), 1),
        (sorted_key("a,o=x"), 2),
        (sorted_key("b,o=x"), 3),
        (sorted_key("c,b,o=x"), 4),
        (sorted_key("d,c,b,o=x"), 5),
        (sorted_key("e,missing,o=x"), 6),
    ];
    // split into two shuffled runs, each sorted by key.
    entries.shuffle(&mut rng);
    let (left, right) = entries.split_at(3);
    let mut runs: Vec<Vec<(Vec<u8>, u64)>> = vec![left.to_vec(), right.to_vec()];
    for run in runs.iter_mut() {
        run.sort();
    }
    let runs: Vec<Vec<SpillRec>> = runs
        .iter()
        .map(|run| run.iter().map(|(k, id)| rec(k, &[*id], &[])).collect())
        .collect();
    let spans = write_runs(&loc, &runs);

    let merge = NamingMerge {
        job: MergeJob {
            index_id: 0,
            name: "dn.naming".to_string(),
            loc,
            spans,
            index: naming.clone(),
            cmp: Comparator::Naming,
            read_ahead: 64,
            naming: true,
        },
        base_key: sorted_key("o=x"),
        children: children.clone(),
        subtree: subtree.clone(),
        replace_existing: false,
    };
    let stats = merge.run(Arc::new(AtomicBool::new(false))).unwrap();
    assert_eq!(stats.accepted, 5);
    assert_eq!(stats.rejected, 1);

    let get_ids = |index: &Arc<dyn Index>, key: &[u8]| -> Vec<u64> {
        match index.get(key).unwrap() {
            Some(set) => set.as_ids().unwrap().to_vec(),
            None => vec![],
        }
    };

    // naming: the five valid entries, not the dangling one.
    assert_eq!(naming.len().unwrap(), 5);
    assert_eq!(get_ids(&naming, &sorted_key("d,c,b,o=x")), vec![5]);
    assert_eq!(get_ids(&naming, &sorted_key("e,missing,o=x")), vec![]);

    // children: immediate parent/child pairs, keyed by parent id.
    assert_eq!(get_ids(&children, &1_u64.to_be_bytes()), vec![2, 3]);
    assert_eq!(get_ids(&children, &3_u64.to_be_bytes()), vec![4]);
    assert_eq!(get_ids(&children, &4_u64.to_be_bytes()), vec![5]);

    // subtree: every (ancestor, descendant) pair.
    assert_eq!(get_ids(&subtree, &1_u64.to_be_bytes()), vec![2, 3, 4, 5]);
    assert_eq!(get_ids(&subtree, &3_u64.to_be_bytes()), vec![4, 5]);
    assert_eq!(get_ids(&subtree, &4_u64.to_be_bytes()), vec![5]);
}

#[test]
fn test_naming_merge_duplicates() {
    let dir = std::env::temp_dir().join("test_naming_merge_duplicates");
    fs::create_dir_all(&dir).unwrap();

    for (replace, want) in [(false, 2_u64), (true, 7_u64)].iter() {
        let loc = dir.join("dn.naming.run").into_os_string();
        let store = MemStore::new();
        let container = store.open("o=x").unwrap();
        let naming = container.index(&IndexKey::naming()).unwrap();
        let children = container.index(&IndexKey::children()).unwrap();
        let subtree = container.index(&IndexKey::subtree()).unwrap();

        let runs = vec![vec![
            rec(&sorted_key("o=x"), &[1], &[]),
            rec(&sorted_key("a,o=x"), &[2, 7], &[]),
        ]];
        let spans = write_runs(&loc, &runs);

        let merge = NamingMerge {
            job: MergeJob {
                index_id: 0,
                name: "dn.naming".to_string(),
                loc,
                spans,
                index: naming.clone(),
                cmp: Comparator::Naming,
                read_ahead: 64,
                naming: true,
            },
            base_key: sorted_key("o=x"),
            children: children.clone(),
            subtree: subtree.clone(),
            replace_existing: *replace,
        };
        let stats = merge.run(Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 1);

        let set = naming.get(&sorted_key("a,o=x")).unwrap().unwrap();
        assert_eq!(set.as_ids().unwrap(), &[*want]);
    }
}
