//! Module `sorter` implement the sort executor: a bounded pool, sized
//! to the worker count, that sorts filled buffers and routes each to
//! its index's spill-run writer.

use std::{
    collections::HashMap,
    ffi,
    sync::{Arc, Mutex},
};

use crate::{
    bulk::buffer::{PoolTx, SortBuf},
    bulk::spill::{self, RunSpan, Spill},
    util::thread::{Pool, Rx, Tx},
    Error, Result,
};

/// Registry of spill-run writers, one per index, created on first
/// record for that index. Creation is idempotent under a single mutex.
pub struct SpillBank {
    dir: ffi::OsString,
    chan_size: usize,
    pool: PoolTx,
    /// index-id to (suffix ordinal, index name), fixed at suffix init.
    names: Vec<(usize, String)>,
    map: Mutex<HashMap<u32, Spill>>,
}

impl SpillBank {
    pub fn new(
        dir: &ffi::OsStr,
        chan_size: usize,
        pool: PoolTx,
        names: Vec<(usize, String)>,
    ) -> SpillBank {
        SpillBank {
            dir: dir.to_os_string(),
            chan_size,
            pool,
            names,
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Route one sorted buffer to its writer.
    pub fn enqueue(&self, buf: SortBuf) -> Result<()> {
        let index_id = match buf.index_id() {
            Some(index_id) => index_id,
            None => return self.release(buf),
        };
        let tx = {
            let mut map = self.map.lock().unwrap();
            if !map.contains_key(&index_id) {
                let (ord, name) = match self.names.get(index_id as usize) {
                    Some(entry) => entry,
                    None => return err_at!(Fatal, msg: "unknown index-id {}", index_id),
                };
                let loc = spill::to_run_location(&self.dir, *ord, name);
                let writer = Spill::new(&loc, self.chan_size, self.pool.clone())?;
                map.insert(index_id, writer);
            }
            map.get(&index_id).unwrap().handle()
        };
        tx.post(buf)
    }

    /// Hand a buffer straight back to the free pool.
    pub fn release(&self, buf: SortBuf) -> Result<()> {
        self.pool.put(buf)
    }

    /// Close every writer and collect, per index, the run-file
    /// location and its run spans.
    pub fn close(self) -> Result<HashMap<u32, (ffi::OsString, Vec<RunSpan>)>> {
        let mut runs = HashMap::new();
        let map = self.map.into_inner().unwrap();
        for (index_id, writer) in map.into_iter() {
            let loc = writer.to_location();
            let spans = writer.close()?;
            runs.insert(index_id, (loc, spans));
        }
        Ok(runs)
    }
}

/// The sort executor pool.
pub struct Sorter {
    pool: Pool<SortBuf, (), Result<()>>,
}

impl Sorter {
    pub fn new(workers: usize, chan_size: usize, bank: Arc<SpillBank>) -> Sorter {
        let pool = Pool::new_sync("sorter", workers, chan_size, move |rx: Rx<SortBuf, ()>| {
            let bank = Arc::clone(&bank);
            move || sort_loop(rx, bank)
        });
        Sorter { pool }
    }

    /// Hand over one filled buffer for sorting.
    pub fn post(&self, buf: SortBuf) -> Result<()> {
        self.pool.post(buf)
    }

    /// A standalone sender usable from worker threads.
    pub fn sender(&self) -> SorterTx {
        SorterTx {
            txs: self.pool.to_txs(),
        }
    }

    /// Drain the queues and stop the pool, surfacing the first sort
    /// task failure.
    pub fn close_wait(self) -> Result<()> {
        for res in self.pool.close_wait()? {
            res?;
        }
        Ok(())
    }
}

/// Cloneable sender into the sort executor. All sender clones must be
/// dropped before [Sorter::close_wait] can finish.
pub struct SorterTx {
    txs: Vec<Tx<SortBuf, ()>>,
}

impl Clone for SorterTx {
    fn clone(&self) -> SorterTx {
        SorterTx {
            txs: self.txs.iter().map(|tx| tx.clone()).collect(),
        }
    }
}

impl SorterTx {
    pub fn post(&self, buf: SortBuf) -> Result<()> {
        let n: usize = rand::random::<usize>() % self.txs.len();
        self.txs[n].post(buf)
    }
}

// After a writer failure the loop keeps draining its queue, releasing
// buffers back to the pool, so producers never block on a dead sort
// thread; the error surfaces at close_wait.
fn sort_loop(rx: Rx<SortBuf, ()>, bank: Arc<SpillBank>) -> Result<()> {
    let mut failed: Option<Error> = None;
    for (mut buf, _) in rx {
        if buf.is_poison() {
            continue;
        }
        if failed.is_some() {
            bank.release(buf).ok();
            continue;
        }
        buf.sort();
        if let Err(err) = bank.enqueue(buf) {
            failed = Some(err);
        }
    }
    match failed {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
