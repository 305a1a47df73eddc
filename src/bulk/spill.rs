//! Module `spill` implement the per-index spill-run writer and the
//! run-file cursor.
//!
//! **Run-file format**, big-endian throughout:
//!
//! ```text
//! *------------------------------------------*
//! |               index-id (u32)             |
//! *------------------------------------------*
//! |               key-len (u32)              |
//! |                key-bytes                 |
//! *------------------------------------------*
//! |             insert-len (u32)             |
//! |            insert-ids (u64 * n)          |
//! *------------------------------------------*
//! |             delete-len (u32)             |
//! |            delete-ids (u64 * m)          |
//! *------------------------------------------*
//! ```
//!
//! Lengths count bytes. An insert-len of `0xFFFF_FFFF` encodes an
//! undefined posting list with no ids following. Records within one
//! run (the drain of one sorted buffer) are sorted; the file holds one
//! run after another and the merger k-way merges across them via the
//! recorded (offset, length) spans.

use fs2::FileExt;
use log::debug;

use std::{
    cmp,
    convert::TryFrom,
    ffi, fs,
    io::{Read, Seek, SeekFrom},
    path,
};

use crate::{
    bulk::buffer::{Op, PoolTx, SortBuf},
    bulk::idset::{TryIntoArr, UNDEFINED_LEN},
    check_remaining, err_at, read_file,
    util::{
        self,
        thread::{Rx, Tx},
    },
    write_file, Error, Result,
};

/// Depth of a spill writer's intake queue, in sorted buffers.
pub const SPILL_QUEUE_SIZE: usize = 16;

/// A run file is uniquely locatable by `dir`, the suffix ordinal and
/// the index name. `format!("{:02}-{}.run", ord, name)`.
#[derive(Clone)]
pub struct RunFileName(pub ffi::OsString);

impl RunFileName {
    pub fn new(ord: usize, name: &str) -> RunFileName {
        let file_name = format!("{:02}-{}.run", ord, name);
        RunFileName(AsRef::<ffi::OsStr>::as_ref(&file_name).to_os_string())
    }
}

impl From<RunFileName> for ffi::OsString {
    fn from(val: RunFileName) -> ffi::OsString {
        val.0
    }
}

/// Compose the run-file path for one index under `dir`.
pub fn to_run_location(dir: &ffi::OsStr, ord: usize, name: &str) -> ffi::OsString {
    let loc: path::PathBuf = [dir.to_os_string(), RunFileName::new(ord, name).into()]
        .iter()
        .collect();
    loc.into_os_string()
}

/// Boundaries of one sorted run inside a run file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSpan {
    pub begin: u64,
    pub end: u64,
}

/// One aggregated run-file record: all ids a single sorted buffer held
/// for one (key, index-id).
#[derive(Clone, Debug, PartialEq)]
pub struct SpillRec {
    pub index_id: u32,
    pub key: Vec<u8>,
    /// Insert side is undefined; no insert ids follow.
    pub undefined: bool,
    pub ins: Vec<u64>,
    pub del: Vec<u64>,
}

impl SpillRec {
    fn new(index_id: u32, key: &[u8]) -> SpillRec {
        SpillRec {
            index_id,
            key: key.to_vec(),
            undefined: false,
            ins: vec![],
            del: vec![],
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.index_id.to_be_bytes());
        buf.extend_from_slice(&u32::try_from(self.key.len()).unwrap().to_be_bytes());
        buf.extend_from_slice(&self.key);
        if self.undefined {
            buf.extend_from_slice(&UNDEFINED_LEN.to_be_bytes());
        } else {
            let n = u32::try_from(self.ins.len() * 8).unwrap();
            buf.extend_from_slice(&n.to_be_bytes());
            for id in self.ins.iter() {
                buf.extend_from_slice(&id.to_be_bytes());
            }
        }
        let m = u32::try_from(self.del.len() * 8).unwrap();
        buf.extend_from_slice(&m.to_be_bytes());
        for id in self.del.iter() {
            buf.extend_from_slice(&id.to_be_bytes());
        }
    }
}

/// Spill-run writer for one index. A dedicated thread drains a queue
/// of sorted buffers into the run file and hands each buffer back to
/// the free pool; the (offset, length) span of every run is recorded
/// for phase 2. Terminates on a poison buffer or on queue disconnect.
pub struct Spill {
    loc: ffi::OsString,
    th: Option<util::Thread<SortBuf, (), Result<Vec<RunSpan>>>>,
    tx: Option<Tx<SortBuf, ()>>,
}

impl Spill {
    pub fn new(loc: &ffi::OsStr, chan_size: usize, pool: PoolTx) -> Result<Spill> {
        let fd = util::create_file_a(loc)?;

        let ffpp = loc.to_os_string();
        let th = util::Thread::new_sync(
            "spill",
            chan_size,
            move |rx: Rx<SortBuf, ()>| move || thread_spill(ffpp, fd, rx, pool),
        );
        let tx = th.to_tx();

        Ok(Spill {
            loc: loc.to_os_string(),
            th: Some(th),
            tx: Some(tx),
        })
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.loc.clone()
    }

    /// Queue one sorted buffer for draining.
    pub fn post(&self, buf: SortBuf) -> Result<()> {
        self.tx.as_ref().unwrap().post(buf)
    }

    /// A clone of the intake channel, to post without holding the
    /// writer registry lock.
    pub fn handle(&self) -> Tx<SortBuf, ()> {
        self.tx.as_ref().unwrap().clone()
    }

    /// Close the intake and wait for the writer; returns the run
    /// spans, in file order.
    pub fn close(mut self) -> Result<Vec<RunSpan>> {
        std::mem::drop(self.tx.take());
        self.th.take().unwrap().join()?
    }
}

impl Drop for Spill {
    fn drop(&mut self) {
        std::mem::drop(self.tx.take());
    }
}

fn thread_spill(
    loc: ffi::OsString,
    mut fd: fs::File,
    rx: Rx<SortBuf, ()>,
    pool: PoolTx,
) -> Result<Vec<RunSpan>> {
    err_at!(IOError, fd.lock_shared(), "fail read lock for {:?}", loc)?;

    let mut spans: Vec<RunSpan> = vec![];
    let mut fpos = 0_u64;
    let mut block: Vec<u8> = vec![];
    // after a write failure keep draining the queue so producers never
    // block on this writer; the error surfaces on close.
    let mut failed: Option<Error> = None;

    for (mut buf, _) in rx {
        if buf.is_poison() {
            break;
        }
        if failed.is_some() || buf.is_empty() {
            pool.put(buf)?;
            continue;
        }

        block.clear();
        let mut cur: Option<SpillRec> = None;
        for rec in buf.drain() {
            let brk = match &cur {
                Some(c) => c.index_id != rec.index_id || c.key != rec.key,
                None => true,
            };
            if brk {
                if let Some(c) = cur.take() {
                    c.encode(&mut block);
                }
                cur = Some(SpillRec::new(rec.index_id, rec.key));
            }
            let c = cur.as_mut().unwrap();
            match rec.op {
                Op::Insert => c.ins.push(rec.entry_id),
                Op::Delete => c.del.push(rec.entry_id),
            }
        }
        if let Some(c) = cur.take() {
            c.encode(&mut block);
        }

        match write_file!(fd, &block, &loc, "flushing spill run") {
            Ok(_) => {
                let begin = fpos;
                fpos += u64::try_from(block.len()).unwrap();
                spans.push(RunSpan { begin, end: fpos });
                debug!(
                    target: "spill ",
                    "{:?}, run {}..{} ({} records)", loc, begin, fpos, buf.len()
                );
            }
            Err(err) => failed = Some(err),
        }
        pool.put(buf)?;
    }

    if let Some(err) = failed {
        fd.unlock().ok();
        return Err(err);
    }
    err_at!(IOError, fd.sync_all(), "fail sync_all {:?}", loc)?;
    err_at!(IOError, fd.unlock(), "fail read unlock {:?}", loc)?;

    Ok(spans)
}

/// Read cursor over one sorted run, with bounded read-ahead. More
/// records remain exactly while `begin + consumed < end`; `next`
/// returns `None` once the span is exhausted.
pub struct RunCursor {
    loc: ffi::OsString,
    fd: fs::File,
    end: u64,
    fpos: u64,
    buf: Vec<u8>,
    off: usize,
    read_ahead: usize,
}

impl RunCursor {
    pub fn new(loc: &ffi::OsStr, span: RunSpan, read_ahead: usize) -> Result<RunCursor> {
        let fd = util::open_file_r(loc)?;
        Ok(RunCursor {
            loc: loc.to_os_string(),
            fd,
            end: span.end,
            fpos: span.begin,
            buf: vec![],
            off: 0,
            read_ahead: cmp::max(read_ahead, 64),
        })
    }

    fn has_more(&self) -> bool {
        (self.buf.len() - self.off) > 0 || self.fpos < self.end
    }

    // make sure at least `want` un-consumed bytes are windowed in.
    fn ensure(&mut self, want: usize) -> Result<()> {
        while (self.buf.len() - self.off) < want && self.fpos < self.end {
            if self.off > 0 {
                self.buf.drain(..self.off);
                self.off = 0;
            }
            let n = cmp::min(u64::try_from(self.read_ahead).unwrap(), self.end - self.fpos);
            let chunk = read_file!(self.fd, SeekFrom::Start(self.fpos), n, "run read")?;
            self.buf.extend_from_slice(&chunk);
            self.fpos += n;
        }
        check_remaining!(&self.buf[self.off..], want, "run record")?;
        Ok(())
    }

    fn take4(&mut self) -> u32 {
        let val = u32::from_be_bytes(self.buf[self.off..self.off + 4].try_into_arr());
        self.off += 4;
        val
    }

    fn take_ids(&mut self, bytes: usize) -> Result<Vec<u64>> {
        if bytes % 8 != 0 {
            return err_at!(
                DecodeFail, msg: "id run {} not a multiple of 8 in {:?}", bytes, self.loc
            );
        }
        self.ensure(bytes)?;
        let mut ids = Vec::with_capacity(bytes / 8);
        for _ in 0..(bytes / 8) {
            let id = u64::from_be_bytes(self.buf[self.off..self.off + 8].try_into_arr());
            self.off += 8;
            ids.push(id);
        }
        Ok(ids)
    }

    fn decode_next(&mut self) -> Result<SpillRec> {
        self.ensure(8)?;
        let index_id = self.take4();
        let key_len = usize::try_from(self.take4()).unwrap();

        self.ensure(key_len + 4)?;
        let key = self.buf[self.off..self.off + key_len].to_vec();
        self.off += key_len;

        let ins_len = self.take4();
        let (undefined, ins) = if ins_len == UNDEFINED_LEN {
            (true, vec![])
        } else {
            (false, self.take_ids(usize::try_from(ins_len).unwrap())?)
        };

        self.ensure(4)?;
        let del_len = usize::try_from(self.take4()).unwrap();
        let del = self.take_ids(del_len)?;

        Ok(SpillRec {
            index_id,
            key,
            undefined,
            ins,
            del,
        })
    }
}

impl Iterator for RunCursor {
    type Item = Result<SpillRec>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_more() {
            return None;
        }
        Some(self.decode_next())
    }
}

#[cfg(test)]
#[path = "spill_test.rs"]
mod spill_test;
