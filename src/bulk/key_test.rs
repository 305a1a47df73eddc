use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::*;

fn hash_of<T: Hash>(t: &T) -> u64 {
    let mut h = DefaultHasher::new();
    t.hash(&mut h);
    h.finish()
}

#[test]
fn test_index_key_identity() {
    let a = IndexKey::new("CN", IndexType::Substring).set_substr_len(3);
    let b = IndexKey::new("cn", IndexType::Substring).set_substr_len(6);
    let c = IndexKey::new("cn", IndexType::Equality);

    // substring length hint does not affect identity.
    assert_eq!(a, b);
    assert_eq!(hash_of(&a), hash_of(&b));
    assert_ne!(a, c);

    assert_eq!(a.name(), "cn.substring");
    assert_eq!(IndexKey::naming().name(), "dn.naming");
    assert_eq!(IndexKey::new("mail;x", IndexType::Presence).name(), "mail_x.presence");
}

#[test]
fn test_comparators() {
    use std::cmp::Ordering;
    use std::convert::TryFrom;

    let bin = Comparator::Binary;
    assert_eq!(bin.compare(b"abc", b"abd"), Ordering::Less);
    assert_eq!(bin.compare(b"abc", b"abc"), Ordering::Equal);

    let cmp = IndexKey::naming().comparator();
    assert_eq!(cmp, Comparator::Naming);

    let base = crate::name::Name::try_from("o=x").unwrap().to_sorted_bytes();
    let a = crate::name::Name::try_from("a,o=x").unwrap().to_sorted_bytes();
    let ca = crate::name::Name::try_from("c,a,o=x").unwrap().to_sorted_bytes();
    let b = crate::name::Name::try_from("b,o=x").unwrap().to_sorted_bytes();

    assert_eq!(cmp.compare(&base, &a), Ordering::Less);
    assert_eq!(cmp.compare(&a, &ca), Ordering::Less);
    assert_eq!(cmp.compare(&ca, &b), Ordering::Less);
    assert_eq!(cmp.compare(&b, &b), Ordering::Equal);

    // structural order coincides with byte order of the sorted form.
    let mut keys = vec![b.clone(), ca.clone(), base.clone(), a.clone()];
    let mut byte_sorted = keys.clone();
    byte_sorted.sort();
    keys.sort_by(|x, y| cmp.compare(x, y));
    assert_eq!(keys, byte_sorted);
}
