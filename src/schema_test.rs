use super::*;

#[test]
fn test_equality_keys() {
    let at = AttrType::new("cn", &[IndexType::Equality]);
    let values = vec![b"  Alice  ".to_vec(), b"ALICE".to_vec(), b"bob".to_vec()];
    let keys = at.index_keys(IndexType::Equality, &values);
    assert_eq!(keys, vec![b"alice".to_vec(), b"bob".to_vec()]);
}

#[test]
fn test_presence_keys() {
    let at = AttrType::new("description", &[IndexType::Presence]);
    let keys = at.index_keys(IndexType::Presence, &[b"anything".to_vec()]);
    assert_eq!(keys, vec![PRESENCE_KEY.to_vec()]);

    // no values, no presence record.
    assert_eq!(at.index_keys(IndexType::Presence, &[]), Vec::<Vec<u8>>::new());
}

#[test]
fn test_substring_keys() {
    let at = AttrType::new("cn", &[IndexType::Substring]).set_substr_len(3);
    let keys = at.index_keys(IndexType::Substring, &[b"abcd".to_vec()]);
    assert_eq!(keys, vec![b"abc".to_vec(), b"bcd".to_vec()]);

    // values shorter than the window collapse to the whole value.
    let keys = at.index_keys(IndexType::Substring, &[b"ab".to_vec()]);
    assert_eq!(keys, vec![b"ab".to_vec()]);

    assert_eq!(
        at.to_index_key(IndexType::Substring).substr_len,
        Some(3)
    );
}

#[test]
fn test_approximate_keys() {
    let at = AttrType::new("sn", &[IndexType::Approximate]);
    let keys = at.index_keys(IndexType::Approximate, &[b"Robert".to_vec()]);
    assert_eq!(keys, vec![b"R163".to_vec()]);

    // phonetic twins share a key.
    let twins = at.index_keys(IndexType::Approximate, &[b"Rupert".to_vec()]);
    assert_eq!(keys, twins);
}

#[test]
fn test_ext_keyer() {
    fn shared_prefix(values: &[Vec<u8>]) -> Vec<Vec<u8>> {
        values.iter().map(|v| v[..1.min(v.len())].to_vec()).collect()
    }

    let at = AttrType::new("cn", &[IndexType::Equality]).set_ext_substring(shared_prefix);
    assert!(at.kinds.contains(&IndexType::ExtSubstring));
    let keys = at.index_keys(IndexType::ExtSubstring, &[b"abc".to_vec()]);
    assert_eq!(keys, vec![b"a".to_vec()]);

    // no keyer registered, no records.
    let bare = AttrType::new("cn", &[IndexType::Equality]);
    assert_eq!(
        bare.index_keys(IndexType::ExtSubstring, &[b"abc".to_vec()]),
        Vec::<Vec<u8>>::new()
    );
}

#[test]
fn test_default_schema() {
    let schema = Schema::default();
    assert!(schema.lookup("cn").is_some());
    assert!(schema.lookup("objectclass").is_some());
    assert!(schema.lookup("no-such-attr").is_none());

    let cn = schema.lookup("cn").unwrap();
    assert!(cn.kinds.contains(&IndexType::Equality));
    assert!(cn.kinds.contains(&IndexType::Substring));
}
