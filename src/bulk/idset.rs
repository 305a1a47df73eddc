//! Module `idset` implement the posting list attached to an index key.
//!
//! An id-set is either DEFINED, holding the exact strictly-ascending
//! entry-ids, or UNDEFINED once its size would exceed the index's
//! entry-limit. An undefined set never returns to defined; when the
//! index maintains counts it keeps an approximate member count, else
//! it only remembers that it is undefined.
//!
//! **Serialized form** (big-endian):
//!
//! ```text
//! defined:    len:u32 (byte length) | id:u64 * (len/8)
//! undefined:  0xFFFF_FFFF | count:u64     (count only when maintained)
//! ```
//!
//! Run files use the same sentinel but never carry the trailing count,
//! refer to the `spill` module for the record layout.

use std::convert::TryFrom;

use crate::{check_remaining, err_at, Error, Result};

/// Length sentinel marking an undefined set.
pub const UNDEFINED_LEN: u32 = 0xFFFF_FFFF;

#[derive(Clone, Debug, PartialEq)]
enum State {
    Defined(Vec<u64>),
    Undefined(Option<u64>),
}

/// Sorted set of entry-ids with an entry-limit and optional count
/// maintenance.
#[derive(Clone, Debug, PartialEq)]
pub struct IdSet {
    limit: usize,
    with_count: bool,
    state: State,
}

impl IdSet {
    pub fn new(limit: usize, with_count: bool) -> IdSet {
        IdSet {
            limit,
            with_count,
            state: State::Defined(vec![]),
        }
    }

    /// An undefined set with no maintained count; merging it into any
    /// set forces the result undefined.
    pub fn undefined() -> IdSet {
        IdSet {
            limit: 0,
            with_count: false,
            state: State::Undefined(None),
        }
    }

    /// Build from ids, applying the limit.
    pub fn from_ids(limit: usize, with_count: bool, ids: &[u64]) -> IdSet {
        let mut set = IdSet::new(limit, with_count);
        for id in ids {
            set.add(*id);
        }
        set
    }

    /// Add one id. On a defined set duplicates are ignored; crossing
    /// the limit tips the set to undefined, permanently. On an
    /// undefined set only the count is maintained.
    pub fn add(&mut self, id: u64) {
        match &mut self.state {
            State::Defined(ids) => {
                match ids.binary_search(&id) {
                    Ok(_) => return,
                    Err(off) => ids.insert(off, id),
                }
                if ids.len() > self.limit {
                    let count = if self.with_count {
                        Some(u64::try_from(ids.len()).unwrap())
                    } else {
                        None
                    };
                    self.state = State::Undefined(count);
                }
            }
            State::Undefined(count) => {
                if let Some(n) = count {
                    *n += 1;
                }
            }
        }
    }

    /// Remove one id. Removal from an undefined set only adjusts the
    /// count; the set stays undefined.
    pub fn remove(&mut self, id: u64) {
        match &mut self.state {
            State::Defined(ids) => {
                if let Ok(off) = ids.binary_search(&id) {
                    ids.remove(off);
                }
            }
            State::Undefined(count) => {
                if let Some(n) = count {
                    *n = n.saturating_sub(1);
                }
            }
        }
    }

    /// Union `other` into this set. If either side is undefined, or the
    /// union would exceed the limit, the result is undefined. Counts
    /// add up; overlap between two counted sets is not recoverable.
    pub fn merge(&mut self, other: &IdSet) {
        match (&mut self.state, &other.state) {
            (State::Defined(ids), State::Defined(oids)) => {
                for id in oids {
                    match ids.binary_search(id) {
                        Ok(_) => (),
                        Err(off) => ids.insert(off, *id),
                    }
                }
                if ids.len() > self.limit {
                    let count = if self.with_count {
                        Some(u64::try_from(ids.len()).unwrap())
                    } else {
                        None
                    };
                    self.state = State::Undefined(count);
                }
            }
            (State::Defined(ids), State::Undefined(ocount)) => {
                let count = match (self.with_count, ocount) {
                    (true, Some(m)) => Some(u64::try_from(ids.len()).unwrap() + m),
                    _ => None,
                };
                self.state = State::Undefined(count);
            }
            (State::Undefined(count), State::Defined(oids)) => {
                if let Some(n) = count {
                    *n += u64::try_from(oids.len()).unwrap();
                }
            }
            (State::Undefined(count), State::Undefined(ocount)) => {
                *count = match (*count, ocount) {
                    (Some(n), Some(m)) => Some(n + m),
                    _ => None,
                };
            }
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self.state, State::Defined(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.state, State::Defined(ids) if ids.is_empty())
    }

    /// Exact member count of a defined set.
    pub fn len(&self) -> Option<usize> {
        match &self.state {
            State::Defined(ids) => Some(ids.len()),
            State::Undefined(_) => None,
        }
    }

    /// Defined length, or the maintained count of an undefined set.
    pub fn count(&self) -> Option<u64> {
        match &self.state {
            State::Defined(ids) => Some(u64::try_from(ids.len()).unwrap()),
            State::Undefined(count) => *count,
        }
    }

    /// The ids of a defined set.
    pub fn as_ids(&self) -> Option<&[u64]> {
        match &self.state {
            State::Defined(ids) => Some(ids),
            State::Undefined(_) => None,
        }
    }

    /// Serialize into `buf`, returning the number of bytes appended.
    pub fn encode(&self, buf: &mut Vec<u8>) -> usize {
        match &self.state {
            State::Defined(ids) => {
                let n = u32::try_from(ids.len() * 8).unwrap();
                buf.extend_from_slice(&n.to_be_bytes());
                for id in ids {
                    buf.extend_from_slice(&id.to_be_bytes());
                }
                4 + (ids.len() * 8)
            }
            State::Undefined(count) => {
                buf.extend_from_slice(&UNDEFINED_LEN.to_be_bytes());
                match count {
                    Some(n) => {
                        buf.extend_from_slice(&n.to_be_bytes());
                        12
                    }
                    None => 4,
                }
            }
        }
    }

    /// Deserialize from `buf`, reproducing the original state. The
    /// limit and count-maintenance flag come from the owning index's
    /// configuration; they decide whether an undefined record carries
    /// a trailing count. Returns the set and the bytes consumed.
    pub fn decode(buf: &[u8], limit: usize, with_count: bool) -> Result<(IdSet, usize)> {
        check_remaining!(buf, 4, "idset length")?;
        let n = u32::from_be_bytes(buf[..4].try_into_arr());

        if n == UNDEFINED_LEN {
            let (count, m) = if with_count {
                check_remaining!(buf, 12, "idset count")?;
                (Some(u64::from_be_bytes(buf[4..12].try_into_arr())), 12)
            } else {
                (None, 4)
            };
            let val = IdSet {
                limit,
                with_count,
                state: State::Undefined(count),
            };
            return Ok((val, m));
        }

        let n = usize::try_from(n).unwrap();
        if n % 8 != 0 {
            return err_at!(DecodeFail, msg: "idset byte length {} not a multiple of 8", n);
        }
        check_remaining!(buf, 4 + n, "idset ids")?;
        let mut ids = Vec::with_capacity(n / 8);
        for off in (4..4 + n).step_by(8) {
            let id = u64::from_be_bytes(buf[off..off + 8].try_into_arr());
            match ids.last() {
                Some(last) if *last >= id => {
                    return err_at!(DecodeFail, msg: "idset ids not ascending at {}", id)
                }
                _ => ids.push(id),
            }
        }
        let val = IdSet {
            limit,
            with_count,
            state: State::Defined(ids),
        };
        Ok((val, 4 + n))
    }
}

// Small helper over TryFrom for fixed-size slices; decode paths check
// bounds up front so the conversion cannot fail.
pub(crate) trait TryIntoArr<const N: usize> {
    fn try_into_arr(&self) -> [u8; N];
}

impl<const N: usize> TryIntoArr<N> for [u8] {
    fn try_into_arr(&self) -> [u8; N] {
        <[u8; N]>::try_from(self).unwrap()
    }
}

#[cfg(test)]
#[path = "idset_test.rs"]
mod idset_test;
