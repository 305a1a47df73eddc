use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::collections::BTreeSet;

use super::*;

#[test]
fn test_limit_boundary() {
    let mut set = IdSet::new(3, true);
    for id in [10, 20, 30].iter() {
        set.add(*id);
    }
    assert!(set.is_defined());
    assert_eq!(set.len(), Some(3));

    // flips to undefined at size = limit + 1 ...
    set.add(40);
    assert!(!set.is_defined());
    assert_eq!(set.count(), Some(4));

    // ... and never flips back.
    set.remove(40);
    set.remove(10);
    assert!(!set.is_defined());
    assert_eq!(set.count(), Some(2));
    set.add(50);
    assert!(!set.is_defined());
    assert_eq!(set.count(), Some(3));
}

#[test]
fn test_add_remove_model() {
    let seed: u128 = random();
    println!("test_add_remove_model {}", seed);
    let mut full_seed = [0u8; 32];
    let seed_bytes = seed.to_le_bytes();
    full_seed[..16].copy_from_slice(&seed_bytes);
    full_seed[16..].copy_from_slice(&seed_bytes);
    let mut rng = SmallRng::from_seed(full_seed);

    let mut set = IdSet::new(1_000_000, false);
    let mut model: BTreeSet<u64> = BTreeSet::new();
    for _ in 0..10_000 {
        let id = u64::from(rng.gen::<u16>());
        if rng.gen::<u8>() % 3 == 0 {
            set.remove(id);
            model.remove(&id);
        } else {
            set.add(id);
            model.insert(id);
        }
    }
    let ids: Vec<u64> = model.into_iter().collect();
    assert_eq!(set.as_ids().unwrap(), ids.as_slice());
}

#[test]
fn test_merge() {
    let a = IdSet::from_ids(10, false, &[1, 3, 5]);
    let b = IdSet::from_ids(10, false, &[2, 3, 4]);
    let mut m = a.clone();
    m.merge(&b);
    assert_eq!(m.as_ids().unwrap(), &[1, 2, 3, 4, 5]);

    // merging past the limit goes undefined.
    let mut m = IdSet::from_ids(4, false, &[1, 3, 5]);
    m.merge(&IdSet::from_ids(4, false, &[2, 4]));
    assert!(!m.is_defined());

    // merging with an undefined side stays undefined, counts add.
    let mut u = IdSet::from_ids(2, true, &[1, 2, 3]);
    assert_eq!(u.count(), Some(3));
    let mut m = IdSet::from_ids(10, true, &[7, 8]);
    m.merge(&u);
    assert!(!m.is_defined());
    assert_eq!(m.count(), Some(5));

    u.merge(&IdSet::from_ids(10, true, &[9]));
    assert_eq!(u.count(), Some(4));
}

#[test]
fn test_codec() {
    let seed: u128 = random();
    println!("test_codec {}", seed);
    let mut full_seed = [0u8; 32];
    let seed_bytes = seed.to_le_bytes();
    full_seed[..16].copy_from_slice(&seed_bytes);
    full_seed[16..].copy_from_slice(&seed_bytes);
    let mut rng = SmallRng::from_seed(full_seed);

    for _ in 0..100 {
        let n = rng.gen::<usize>() % 50;
        let limit = 1 + rng.gen::<usize>() % 50;
        let with_count = rng.gen::<bool>();
        let ids: Vec<u64> = (0..n).map(|_| rng.gen::<u64>()).collect();
        let set = IdSet::from_ids(limit, with_count, &ids);

        let mut buf = vec![];
        let m = set.encode(&mut buf);
        assert_eq!(m, buf.len());
        let (out, consumed) = IdSet::decode(&buf, limit, with_count).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(out, set);
    }

    // corrupt input
    assert!(IdSet::decode(&[0, 0], 10, false).is_err());
    let mut buf = vec![];
    IdSet::from_ids(10, false, &[1, 2]).encode(&mut buf);
    buf.truncate(buf.len() - 1);
    assert!(IdSet::decode(&buf, 10, false).is_err());
}
