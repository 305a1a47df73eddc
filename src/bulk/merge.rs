//! Module `merge` implement phase 2: the heap-based k-way merge of an
//! index's sorted runs, aggregation of duplicate keys into posting
//! lists, and bulk-insert into the store.
//!
//! The naming merger is a specialization used when phase 1 ran without
//! name validation: the naming index's order places every entry right
//! after its ancestors, so the merger can rebuild the children and
//! subtree posting lists on the fly while validating parent
//! relationships that the workers could not look up.

use log::{debug, info};

use std::{
    cmp,
    collections::{BTreeMap, BinaryHeap},
    convert::TryFrom,
    ffi, fs,
    ops::Bound::{Excluded, Unbounded},
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc,
    },
};

use crate::{
    bulk::idset::IdSet,
    bulk::key::Comparator,
    bulk::spill::{RunCursor, RunSpan, SpillRec},
    name,
    store::Index,
    Error, Result,
};

/// One phase-2 merge job: all sorted runs of one index.
pub(crate) struct MergeJob {
    pub index_id: u32,
    pub name: String,
    pub loc: ffi::OsString,
    pub spans: Vec<RunSpan>,
    pub index: Arc<dyn Index>,
    pub cmp: Comparator,
    pub read_ahead: usize,
    /// Naming-flavoured flush: exactly one surviving id per key,
    /// written with `put`.
    pub naming: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct MergeStats {
    /// Distinct keys flushed.
    pub keys: u64,
    /// Entries accepted by the naming merger.
    pub accepted: u64,
    /// Entries rejected during the merge (dangling parents and
    /// duplicate names surface here when validation was skipped).
    pub rejected: u64,
}

// Heap item; order is reversed so the binary heap pops the smallest
// (key, index-id, source) next.
struct HeapItem {
    rec: SpillRec,
    src: usize,
    cmp: Comparator,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.cmp
            .compare(&other.rec.key, &self.rec.key)
            .then_with(|| other.rec.index_id.cmp(&self.rec.index_id))
            .then_with(|| other.src.cmp(&self.src))
    }
}

// Aggregation of every run record carrying one (key, index-id).
struct Acc {
    key: Vec<u8>,
    ins: IdSet,
    del: IdSet,
}

impl Acc {
    fn seed(rec: SpillRec, limit: usize, with_count: bool) -> Acc {
        let mut acc = Acc {
            key: rec.key.clone(),
            ins: IdSet::new(limit, with_count),
            del: IdSet::new(usize::max_value(), false),
        };
        acc.absorb(rec);
        acc
    }

    fn absorb(&mut self, rec: SpillRec) {
        if rec.undefined {
            self.ins.merge(&IdSet::undefined());
        }
        for id in rec.ins {
            self.ins.add(id);
        }
        for id in rec.del {
            self.del.add(id);
        }
    }
}

// Flush one aggregation: deletes are applied first, then the netted
// inserts, so an id inserted and removed within this import nets to
// nothing while pre-existing ids still get removed.
fn flush_acc(job: &MergeJob, acc: Acc, stats: &mut MergeStats) -> Result<()> {
    let Acc { key, mut ins, del } = acc;

    if !del.is_empty() {
        job.index.delete(&key, &del)?;
        if let Some(ids) = del.as_ids() {
            for id in ids {
                ins.remove(*id);
            }
        }
    }

    if job.naming {
        match ins.as_ids() {
            Some([]) => return Ok(()),
            Some([id]) => job.index.put(&key, *id)?,
            Some(ids) => {
                // duplicate names; keep the first admitted entry.
                job.index.put(&key, ids[0])?;
                stats.rejected += to_u64(ids.len() - 1);
            }
            None => return err_at!(Fatal, msg: "undefined naming posting list"),
        }
    } else if !ins.is_empty() {
        job.index.insert(&key, &ins)?;
    }
    stats.keys += 1;
    Ok(())
}

fn open_heap(job: &MergeJob) -> Result<(Vec<RunCursor>, BinaryHeap<HeapItem>)> {
    let mut cursors = vec![];
    for span in job.spans.iter() {
        cursors.push(RunCursor::new(&job.loc, *span, job.read_ahead)?);
    }
    let mut heap = BinaryHeap::new();
    for (src, cursor) in cursors.iter_mut().enumerate() {
        if let Some(rec) = cursor.next() {
            heap.push(HeapItem {
                rec: rec?,
                src,
                cmp: job.cmp,
            });
        }
    }
    Ok((cursors, heap))
}

/// Merge all runs of one index and bulk-insert the aggregated posting
/// lists. The run file is deleted on success.
pub(crate) fn merge_task(job: MergeJob, cancel: Arc<AtomicBool>) -> Result<MergeStats> {
    let (mut cursors, mut heap) = open_heap(&job)?;
    let (limit, with_count) = (job.index.entry_limit(), job.index.maintain_count());

    let mut stats = MergeStats::default();
    let mut acc: Option<Acc> = None;

    while let Some(HeapItem { rec, src, .. }) = heap.pop() {
        if cancel.load(SeqCst) {
            return err_at!(Cancelled, msg: "merge of {} cancelled", job.name);
        }
        match &mut acc {
            Some(a) if a.key == rec.key => a.absorb(rec),
            _ => {
                if let Some(a) = acc.take() {
                    flush_acc(&job, a, &mut stats)?;
                }
                acc = Some(Acc::seed(rec, limit, with_count));
            }
        }
        if let Some(rec) = cursors[src].next() {
            heap.push(HeapItem {
                rec: rec?,
                src,
                cmp: job.cmp,
            });
        }
    }
    if let Some(a) = acc.take() {
        flush_acc(&job, a, &mut stats)?;
    }

    fs::remove_file(&job.loc).ok();
    debug!(target: "merge ", "{}, merged {} keys from {} runs", job.name, stats.keys, job.spans.len());
    Ok(stats)
}

/// The naming merger. In addition to writing the naming index it
/// derives the children and subtree posting lists, because the import
/// workers could not look parents up. Entries stream in an order where
/// every ancestor precedes its descendants; an in-memory parent table
/// tracks the ancestor chain of the node under the cursor.
pub(crate) struct NamingMerge {
    pub job: MergeJob,
    pub base_key: Vec<u8>,
    pub children: Arc<dyn Index>,
    pub subtree: Arc<dyn Index>,
    /// Duplicate names: keep the last admitted entry instead of the
    /// first.
    pub replace_existing: bool,
}

impl NamingMerge {
    pub(crate) fn run(self, cancel: Arc<AtomicBool>) -> Result<MergeStats> {
        let (mut cursors, mut heap) = open_heap(&self.job)?;
        let naming = &self.job.index;

        let mut stats = MergeStats::default();
        let mut acc: Option<Acc> = None;

        // parent table: sorted-name bytes of the current ancestor
        // chain, with their ids.
        let mut table: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
        let mut last: Option<Vec<u8>> = None;

        let (children_limit, children_count) =
            (self.children.entry_limit(), self.children.maintain_count());
        let (subtree_limit, subtree_count) =
            (self.subtree.entry_limit(), self.subtree.maintain_count());
        let mut children_acc: BTreeMap<u64, IdSet> = BTreeMap::new();
        let mut subtree_acc: BTreeMap<u64, IdSet> = BTreeMap::new();

        let process = |key: Vec<u8>,
                           ins: IdSet,
                           table: &mut BTreeMap<Vec<u8>, u64>,
                           last: &mut Option<Vec<u8>>,
                           children_acc: &mut BTreeMap<u64, IdSet>,
                           subtree_acc: &mut BTreeMap<u64, IdSet>,
                           stats: &mut MergeStats|
         -> Result<()> {
            let ids = match ins.as_ids() {
                Some([]) => return Ok(()),
                Some(ids) => ids,
                None => return err_at!(Fatal, msg: "undefined naming posting list"),
            };
            // duplicate names: one survivor, the rest are rejected.
            let id = if self.replace_existing {
                ids[ids.len() - 1]
            } else {
                ids[0]
            };
            stats.rejected += to_u64(ids.len() - 1);

            let parent = if key == self.base_key {
                None
            } else {
                let pkey = match name::parent_sorted_bytes(&key) {
                    Some(pkey) => pkey.to_vec(),
                    None => {
                        stats.rejected += 1;
                        return Ok(());
                    }
                };
                // the previous node, or the greatest table entry, is
                // usually the parent; the structural key resolves both
                // through the table.
                match table.get(&pkey) {
                    Some(pid) => Some((pkey, *pid)),
                    None => {
                        debug!(
                            target: "merge ",
                            "dangling parent for {:?}", String::from_utf8_lossy(&key)
                        );
                        stats.rejected += 1;
                        return Ok(());
                    }
                }
            };

            naming.put(&key, id)?;
            stats.accepted += 1;

            if let Some((pkey, pid)) = &parent {
                // prune entries strictly between the parent and the
                // previous node; they cannot be ancestors of anything
                // after this node in sorted order.
                if let Some(last) = last.take() {
                    let stale: Vec<Vec<u8>> = table
                        .range::<Vec<u8>, _>((Excluded(pkey.clone()), Unbounded))
                        .map(|(k, _)| k.clone())
                        .filter(|k| !name::is_ancestor_sorted_bytes(k, &key) && *k <= last)
                        .collect();
                    for k in stale {
                        table.remove(&k);
                    }
                }

                children_acc
                    .entry(*pid)
                    .or_insert_with(|| IdSet::new(children_limit, children_count))
                    .add(id);
                for (_, aid) in table.iter() {
                    subtree_acc
                        .entry(*aid)
                        .or_insert_with(|| IdSet::new(subtree_limit, subtree_count))
                        .add(id);
                }
            }

            table.insert(key.clone(), id);
            *last = Some(key);
            Ok(())
        };

        while let Some(HeapItem { rec, src, .. }) = heap.pop() {
            if cancel.load(SeqCst) {
                return err_at!(Cancelled, msg: "naming merge cancelled");
            }
            match &mut acc {
                Some(a) if a.key == rec.key => a.absorb(rec),
                _ => {
                    if let Some(a) = acc.take() {
                        let Acc { key, mut ins, del } = a;
                        if let Some(ids) = del.as_ids() {
                            for id in ids {
                                ins.remove(*id);
                            }
                        }
                        stats.keys += 1;
                        process(
                            key,
                            ins,
                            &mut table,
                            &mut last,
                            &mut children_acc,
                            &mut subtree_acc,
                            &mut stats,
                        )?;
                    }
                    acc = Some(Acc::seed(rec, usize::max_value(), false));
                }
            }
            if let Some(rec) = cursors[src].next() {
                heap.push(HeapItem {
                    rec: rec?,
                    src,
                    cmp: self.job.cmp,
                });
            }
        }
        if let Some(a) = acc.take() {
            let Acc { key, mut ins, del } = a;
            if let Some(ids) = del.as_ids() {
                for id in ids {
                    ins.remove(*id);
                }
            }
            stats.keys += 1;
            process(
                key,
                ins,
                &mut table,
                &mut last,
                &mut children_acc,
                &mut subtree_acc,
                &mut stats,
            )?;
        }

        // end of stream: flush the reconstructed posting lists.
        for (pid, set) in children_acc.into_iter() {
            self.children.insert(&pid.to_be_bytes(), &set)?;
        }
        for (aid, set) in subtree_acc.into_iter() {
            self.subtree.insert(&aid.to_be_bytes(), &set)?;
        }

        fs::remove_file(&self.job.loc).ok();
        info!(
            target: "merge ",
            "naming merge: {} accepted, {} rejected", stats.accepted, stats.rejected
        );
        Ok(stats)
    }
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap()
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod merge_test;
