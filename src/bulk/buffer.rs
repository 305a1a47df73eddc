//! Module `buffer` implement the bounded sort buffer and the shared
//! free-buffer pool.
//!
//! A sort buffer is a fixed-capacity region split into a header area of
//! packed record slots and a tail arena holding the key bytes. Buffers
//! cycle through three modes: records are appended until the buffer is
//! full, the sort executor sorts it, the spill writer drains it and
//! resets it back into the free pool. Buffers are allocated once, up
//! front, and reused for the whole import.
//!
//! The zero-capacity _poison_ buffer signals end-of-stream: the pool
//! hands it to blocked takers once the import is aborted.

use std::{collections::VecDeque, convert::TryFrom, mem, sync::mpsc};

use crate::{
    bulk::key::Comparator,
    util::{
        self,
        thread::{Rx, Tx},
    },
    Result,
};

/// Record operation. A single import may remove a key it inserted
/// earlier, the merger nets the two out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Op {
    Insert,
    Delete,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    index_id: u32,
    off: u32,
    len: u32,
    entry_id: u64,
    op: Op,
}

/// Packed slot footprint used for capacity accounting.
pub const SLOT_SIZE: usize = mem::size_of::<Slot>();

#[derive(Clone, Copy, Debug, PartialEq)]
enum Mode {
    Append,
    Sorted,
    Draining,
}

/// Fixed-capacity append-then-sort buffer of records for one index
/// stream.
pub struct SortBuf {
    cap: usize,
    slots: Vec<Slot>,
    keys: Vec<u8>,
    mode: Mode,
    cmp: Comparator,
}

/// One record, exposed while draining.
#[derive(Clone, Copy, Debug)]
pub struct Rec<'a> {
    pub index_id: u32,
    pub key: &'a [u8],
    pub entry_id: u64,
    pub op: Op,
}

impl SortBuf {
    pub fn new(cap: usize) -> SortBuf {
        // buffers are pooled and reused; pre-size the key arena so the
        // hot path never reallocates.
        SortBuf {
            cap,
            slots: vec![],
            keys: Vec::with_capacity(cap),
            mode: Mode::Append,
            cmp: Comparator::Binary,
        }
    }

    /// The poison buffer. It accepts nothing and marks end-of-stream.
    pub fn poison() -> SortBuf {
        SortBuf::new(0)
    }

    pub fn is_poison(&self) -> bool {
        self.cap == 0
    }

    /// Key ordering for the index this buffer is assigned to.
    pub fn set_comparator(&mut self, cmp: Comparator) -> &mut Self {
        self.cmp = cmp;
        self
    }

    /// Would inserting the slot plus `key` exceed capacity.
    pub fn is_space_available(&self, key: &[u8]) -> bool {
        let used = (self.slots.len() + 1) * SLOT_SIZE + self.keys.len();
        used + key.len() <= self.cap
    }

    /// Append one record. Returns false when the buffer is full (or
    /// not in append mode); the caller swaps in a fresh buffer.
    pub fn put(&mut self, index_id: u32, key: &[u8], entry_id: u64, op: Op) -> bool {
        if self.mode != Mode::Append || !self.is_space_available(key) {
            return false;
        }
        // u32 offsets keep the slot packed; capacity is far below 4GiB.
        let off = u32::try_from(self.keys.len()).unwrap();
        self.keys.extend_from_slice(key);
        self.slots.push(Slot {
            index_id,
            off,
            len: u32::try_from(key.len()).unwrap(),
            entry_id,
            op,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index-id of the records held, buffers are filled for one index
    /// at a time.
    pub fn index_id(&self) -> Option<u32> {
        self.slots.first().map(|s| s.index_id)
    }

    /// Sort records into non-decreasing (key, index-id) order under the
    /// assigned comparator.
    pub fn sort(&mut self) {
        let cmp = self.cmp;
        let keys = &self.keys;
        self.slots.sort_by(|a, b| {
            let ka = &keys[a.off as usize..(a.off + a.len) as usize];
            let kb = &keys[b.off as usize..(b.off + b.len) as usize];
            cmp.compare(ka, kb).then(a.index_id.cmp(&b.index_id))
        });
        self.mode = Mode::Sorted;
    }

    /// Ordered cursor over the sorted records.
    pub fn drain(&mut self) -> Drain {
        self.mode = Mode::Draining;
        Drain {
            slots: &self.slots,
            keys: &self.keys,
            off: 0,
        }
    }

    /// Return the buffer to append mode, keeping its capacity.
    pub fn reset(&mut self) -> &mut Self {
        self.slots.clear();
        self.keys.clear();
        self.mode = Mode::Append;
        self.cmp = Comparator::Binary;
        self
    }
}

pub struct Drain<'a> {
    slots: &'a [Slot],
    keys: &'a [u8],
    off: usize,
}

impl<'a> Iterator for Drain<'a> {
    type Item = Rec<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.slots.get(self.off)?;
        self.off += 1;
        Some(Rec {
            index_id: slot.index_id,
            key: &self.keys[slot.off as usize..(slot.off + slot.len) as usize],
            entry_id: slot.entry_id,
            op: slot.op,
        })
    }
}

enum PoolMsg {
    Take,
    Put(SortBuf),
    Poison,
}

/// The shared free-buffer pool, a gen-server owning every pre-allocated
/// buffer. Multi-producer multi-consumer: workers take and the spill
/// writers put back. Once poisoned, every taker receives the poison
/// buffer.
pub struct BufPool {
    th: util::Thread<PoolMsg, SortBuf, ()>,
}

/// Cloneable handle into the pool.
pub struct PoolTx {
    tx: Tx<PoolMsg, SortBuf>,
}

impl Clone for PoolTx {
    fn clone(&self) -> PoolTx {
        PoolTx {
            tx: self.tx.clone(),
        }
    }
}

impl PoolTx {
    /// Pull a free buffer, blocking while none is available. Returns
    /// the poison buffer once the pool is poisoned.
    pub fn take(&self) -> Result<SortBuf> {
        self.tx.request(PoolMsg::Take)
    }

    /// Return a drained buffer to the pool.
    pub fn put(&self, buf: SortBuf) -> Result<()> {
        self.tx.post(PoolMsg::Put(buf))
    }

    /// Abort: wake all blocked takers with poison.
    pub fn poison(&self) -> Result<()> {
        self.tx.post(PoolMsg::Poison)
    }
}

impl BufPool {
    /// Pre-allocate `count` buffers of `size` bytes each.
    pub fn new(count: usize, size: usize) -> BufPool {
        let free: Vec<SortBuf> = (0..count).map(|_| SortBuf::new(size)).collect();
        let th = util::Thread::new("bufpool", move |rx: Rx<PoolMsg, SortBuf>| {
            move || pool_loop(rx, free)
        });
        BufPool { th }
    }

    pub fn handle(&self) -> PoolTx {
        PoolTx {
            tx: self.th.to_tx(),
        }
    }

    pub fn close(self) -> Result<()> {
        self.th.join()
    }
}

fn pool_loop(rx: Rx<PoolMsg, SortBuf>, mut free: Vec<SortBuf>) {
    let mut pending: VecDeque<mpsc::Sender<SortBuf>> = VecDeque::new();
    let mut poisoned = false;

    for (msg, resp) in rx {
        match msg {
            PoolMsg::Take => {
                let resp = resp.unwrap();
                if poisoned {
                    resp.send(SortBuf::poison()).ok();
                } else if let Some(buf) = free.pop() {
                    resp.send(buf).ok();
                } else {
                    pending.push_back(resp);
                }
            }
            PoolMsg::Put(mut buf) => {
                buf.reset();
                match pending.pop_front() {
                    Some(resp) => {
                        resp.send(buf).ok();
                    }
                    None => free.push(buf),
                }
            }
            PoolMsg::Poison => {
                poisoned = true;
                for resp in pending.drain(..) {
                    resp.send(SortBuf::poison()).ok();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
