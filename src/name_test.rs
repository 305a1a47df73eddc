use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::convert::TryFrom;

use super::*;

#[test]
fn test_parse_normalize() {
    let name = Name::try_from(" C , B ,O=X ").unwrap();
    assert_eq!(name.to_string(), "c,b,o=x");
    assert_eq!(name.len(), 3);

    assert!(Name::try_from("a,,o=x").is_err());
    assert!(Name::try_from("  ").is_err());
}

#[test]
fn test_parent_ancestor() {
    let base = Name::try_from("o=x").unwrap();
    let a = Name::try_from("a,o=x").unwrap();
    let c = Name::try_from("c,b,o=x").unwrap();

    assert_eq!(c.parent().unwrap().to_string(), "b,o=x");
    assert_eq!(base.parent(), None);

    assert!(base.is_ancestor_of(&a));
    assert!(base.is_ancestor_of(&c));
    assert!(!a.is_ancestor_of(&c));
    assert!(!base.is_ancestor_of(&base));

    assert!(c.is_within(&base));
    assert!(base.is_within(&base));
    assert!(!base.is_within(&a));

    assert_eq!(base.parent_within_base(&base), None);
    assert_eq!(a.parent_within_base(&base).unwrap(), base);
    let other = Name::try_from("a,o=y").unwrap();
    assert_eq!(other.parent_within_base(&base), None);

    let ancestors = c.ancestors_within_base(&base);
    let strs: Vec<String> = ancestors.iter().map(|n| n.to_string()).collect();
    assert_eq!(strs, vec!["b,o=x".to_string(), "o=x".to_string()]);
    assert_eq!(base.ancestors_within_base(&base), vec![]);
}

#[test]
fn test_sorted_bytes_round_trip() {
    let name = Name::try_from("c,b,o=x").unwrap();
    let key = name.to_sorted_bytes();
    assert_eq!(key, b"o=x\x00b\x00c\x00".to_vec());
    assert_eq!(Name::from_sorted_bytes(&key).unwrap(), name);

    assert!(Name::from_sorted_bytes(b"o=x").is_err());
    assert!(Name::from_sorted_bytes(b"\x00").is_err());
}

#[test]
fn test_parent_sorted_bytes() {
    let c = Name::try_from("c,b,o=x").unwrap().to_sorted_bytes();
    let b = Name::try_from("b,o=x").unwrap().to_sorted_bytes();
    let base = Name::try_from("o=x").unwrap().to_sorted_bytes();

    assert_eq!(parent_sorted_bytes(&c).unwrap(), b.as_slice());
    assert_eq!(parent_sorted_bytes(&b).unwrap(), base.as_slice());
    assert_eq!(parent_sorted_bytes(&base), None);
    assert_eq!(parent_sorted_bytes(b"no-term"), None);

    assert!(is_ancestor_sorted_bytes(&base, &c));
    assert!(is_ancestor_sorted_bytes(&b, &c));
    assert!(!is_ancestor_sorted_bytes(&c, &b));
    assert!(!is_ancestor_sorted_bytes(&base, &base));
}

// Byte order of the sorted form must equal hierarchical order: every
// ancestor sorts before its descendants and a subtree is contiguous.
#[test]
fn test_sorted_bytes_ordering() {
    let seed: u128 = random();
    println!("test_sorted_bytes_ordering {}", seed);
    let mut full_seed = [0u8; 32];
    let seed_bytes = seed.to_le_bytes();
    full_seed[..16].copy_from_slice(&seed_bytes);
    full_seed[16..].copy_from_slice(&seed_bytes);
    let mut rng = SmallRng::from_seed(full_seed);

    let base = Name::try_from("o=x").unwrap();
    let mut names = vec![base.clone()];
    for _ in 0..200 {
        let parent = names[rng.gen::<usize>() % names.len()].clone();
        let comp = format!("c{}", rng.gen::<u16>());
        let text = format!("{},{}", comp, parent);
        names.push(Name::try_from(text.as_str()).unwrap());
    }
    names.sort();
    names.dedup();

    let mut keys: Vec<(Vec<u8>, Name)> =
        names.iter().map(|n| (n.to_sorted_bytes(), n.clone())).collect();
    keys.sort_by(|x, y| x.0.cmp(&y.0));

    for pair in keys.windows(2) {
        let ((ka, na), (kb, nb)) = (&pair[0], &pair[1]);
        assert!(na.cmp(nb) == std::cmp::Ordering::Less, "{} {}", na, nb);
        if na.is_ancestor_of(nb) {
            assert!(is_ancestor_sorted_bytes(ka, kb));
        }
    }

    // subtree contiguity: all descendants of any node form one run.
    for (i, (ka, na)) in keys.iter().enumerate() {
        let mut inside = true;
        for (kb, nb) in keys[i + 1..].iter() {
            let descendant = is_ancestor_sorted_bytes(ka, kb);
            assert_eq!(descendant, na.is_ancestor_of(nb));
            if !descendant {
                inside = false;
            } else {
                assert!(inside, "subtree of {} not contiguous at {}", na, nb);
            }
        }
    }
}
