//! Module `worker` implement the phase-1 tasks: the import workers
//! parsing the entry stream and the migration tasks feeding surviving
//! entries of a pre-existing container through the same emission path.
//!
//! Admission (duplicate and parent checks, entry-id assignment, the
//! entry-table write) happens while the worker still holds the shared
//! source, so admission order equals stream order and a child can
//! always see its parent's reservation. Everything expensive - key
//! derivation and record emission - runs outside the lock.

use log::debug;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering::SeqCst},
        Arc, Mutex,
    },
};

use crate::{
    bulk::buffer::{Op, PoolTx, SortBuf},
    bulk::key::{Comparator, IndexKey},
    bulk::sorter::SorterTx,
    entry::{Entry, EntrySource, Sourced},
    name::Name,
    schema::Schema,
    store::{Container, Index},
    Error, Result,
};

/// Shared import counters, updated by every task and read by the
/// progress timer.
#[derive(Default)]
pub struct ImportStats {
    pub read: AtomicU64,
    pub loaded: AtomicU64,
    pub ignored: AtomicU64,
    pub rejected: AtomicU64,
    pub migrated: AtomicU64,
}

impl ImportStats {
    pub fn new() -> ImportStats {
        ImportStats::default()
    }
}

/// Loading context of one suffix.
pub(crate) struct Suffix {
    pub ord: usize,
    pub base: Name,
    pub base_key: Vec<u8>,
    pub target: Arc<dyn Container>,
    /// The pre-existing container, when an include-branch rewrite
    /// migrates around it.
    pub source: Option<Arc<dyn Container>>,
    pub includes: Vec<Name>,
    pub excludes: Vec<Name>,
    pub naming_index: Arc<dyn Index>,
    pub naming_id: u32,
    pub children_id: u32,
    pub subtree_id: u32,
    /// Per-suffix attribute stream ids.
    pub attr_ids: HashMap<IndexKey, u32>,
    /// Admitted names, the phase-1 validation surface. Unused when
    /// name validation is skipped.
    pub names: Mutex<BTreeMap<Vec<u8>, u64>>,
}

impl Suffix {
    /// Does the entry stream provide this name, under the configured
    /// include/exclude branches.
    pub fn stream_selects(&self, name: &Name) -> bool {
        if !self.includes.is_empty() && !self.includes.iter().any(|i| name.is_within(i)) {
            return false;
        }
        !self.excludes.iter().any(|x| name.is_within(x))
    }
}

/// State shared by every phase-1 task.
pub(crate) struct LoadCtx {
    pub skip_validation: bool,
    pub replace_existing: bool,
    pub append: bool,
    pub schema: Arc<Schema>,
    pub suffixes: Vec<Arc<Suffix>>,
    /// index-id to comparator, for buffer assignment.
    pub cmps: Vec<Comparator>,
    /// EntryID source; id assignment is the only globally serialized
    /// step of phase 1.
    pub seq: AtomicU64,
    pub cancel: Arc<AtomicBool>,
    pub stats: Arc<ImportStats>,
}

impl LoadCtx {
    fn next_id(&self) -> u64 {
        self.seq.fetch_add(1, SeqCst)
    }

    fn suffix_of(&self, name: &Name) -> Option<&Arc<Suffix>> {
        self.suffixes.iter().find(|s| name.is_within(&s.base))
    }
}

/// Outcome of admitting one entry. Rejection is a value; only engine
/// failures are errors.
pub(crate) enum Admission {
    Loaded {
        id: u64,
        /// Ancestor ids, nearest first; empty when validation is
        /// skipped (reconstructed at merge time) or for the base.
        ancestors: Vec<u64>,
    },
    Replaced {
        id: u64,
        old_id: u64,
        ancestors: Vec<u64>,
    },
    Rejected,
}

/// Per-task record emitter owning one current buffer per index
/// stream. On a full buffer it hands the buffer to the sort executor
/// and pulls a fresh one from the free pool; pulling poison surfaces
/// cancellation.
pub(crate) struct Emitter {
    pool: PoolTx,
    sorter: SorterTx,
    cmps: Vec<Comparator>,
    bufs: HashMap<u32, SortBuf>,
}

impl Emitter {
    pub fn new(ctx: &LoadCtx, pool: PoolTx, sorter: SorterTx) -> Emitter {
        Emitter {
            pool,
            sorter,
            cmps: ctx.cmps.clone(),
            bufs: HashMap::new(),
        }
    }

    fn take_fresh(&self, index_id: u32) -> Result<SortBuf> {
        let mut buf = self.pool.take()?;
        if buf.is_poison() {
            return err_at!(Cancelled, msg: "free pool poisoned, import aborted");
        }
        buf.set_comparator(self.cmps[index_id as usize]);
        Ok(buf)
    }

    pub fn emit(&mut self, index_id: u32, key: &[u8], entry_id: u64, op: Op) -> Result<()> {
        for _attempt in 0..2 {
            if !self.bufs.contains_key(&index_id) {
                let buf = self.take_fresh(index_id)?;
                self.bufs.insert(index_id, buf);
            }
            let buf = self.bufs.get_mut(&index_id).unwrap();
            if buf.put(index_id, key, entry_id, op) {
                return Ok(());
            }
            // full: hand over for sorting, retry with a fresh buffer.
            let full = self.bufs.remove(&index_id).unwrap();
            self.sorter.post(full)?;
        }
        err_at!(Fatal, msg: "record key of {} bytes exceeds the sort buffer", key.len())
    }

    /// Flush partial buffers into the sort executor and dissolve.
    pub fn flush(mut self) -> Result<()> {
        for (_, buf) in self.bufs.drain() {
            if buf.is_empty() {
                self.pool.put(buf)?;
            } else {
                self.sorter.post(buf)?;
            }
        }
        Ok(())
    }

    /// Cancellation path: return buffers unsorted and propagate the
    /// poison downstream.
    pub fn abandon(mut self) -> Result<()> {
        for (_, buf) in self.bufs.drain() {
            self.pool.put(buf)?;
        }
        self.pool.poison()
    }
}

// Look a name up in the admitted set, falling back to the target's
// existing naming index in append mode.
fn lookup_name(
    ctx: &LoadCtx,
    sfx: &Suffix,
    names: &BTreeMap<Vec<u8>, u64>,
    key: &[u8],
) -> Result<Option<u64>> {
    if let Some(id) = names.get(key) {
        return Ok(Some(*id));
    }
    if ctx.append {
        if let Some(set) = sfx.naming_index.get(key)? {
            if let Some(ids) = set.as_ids() {
                return Ok(ids.first().copied());
            }
        }
    }
    Ok(None)
}

// Ancestor chain (nearest first) of `name`, with ids. None when some
// ancestor is not admitted.
fn resolve_ancestors(
    ctx: &LoadCtx,
    sfx: &Suffix,
    names: &BTreeMap<Vec<u8>, u64>,
    name: &Name,
) -> Result<Option<Vec<u64>>> {
    let mut ids = vec![];
    for ancestor in name.ancestors_within_base(&sfx.base) {
        match lookup_name(ctx, sfx, names, &ancestor.to_sorted_bytes())? {
            Some(id) => ids.push(id),
            None => return Ok(None),
        }
    }
    Ok(Some(ids))
}

/// Admit one entry: duplicate and parent validation, id assignment,
/// name reservation and the entry-table write. Caller must serialize
/// admissions against stream order (the import workers hold the
/// source lock across this call).
pub(crate) fn admit_one(ctx: &LoadCtx, sfx: &Suffix, entry: &Entry) -> Result<Admission> {
    let name = entry.as_name();
    let name_key = name.to_sorted_bytes();

    if ctx.skip_validation {
        // no lookups at all; the naming merger reconstructs parent
        // relationships and rejects dangling entries during the merge.
        let id = ctx.next_id();
        sfx.target.put_entry(id, entry)?;
        return Ok(Admission::Loaded { id, ancestors: vec![] });
    }

    let mut names = sfx.names.lock().unwrap();

    if let Some(old_id) = lookup_name(ctx, sfx, &names, &name_key)? {
        if !ctx.replace_existing {
            debug!(target: "bulkld", "{}, duplicate of {}", name, old_id);
            return Ok(Admission::Rejected);
        }
        let ancestors = match resolve_ancestors(ctx, sfx, &names, name)? {
            Some(ids) => ids,
            None => return Ok(Admission::Rejected),
        };
        let id = ctx.next_id();
        names.insert(name_key, id);
        sfx.target.put_entry(id, entry)?;
        return Ok(Admission::Replaced { id, old_id, ancestors });
    }

    let ancestors = if *name == sfx.base {
        vec![]
    } else {
        match name.parent_within_base(&sfx.base) {
            Some(_) => match resolve_ancestors(ctx, sfx, &names, name)? {
                Some(ids) => ids,
                None => {
                    debug!(target: "bulkld", "{}, parent not found", name);
                    return Ok(Admission::Rejected);
                }
            },
            None => return Ok(Admission::Rejected),
        }
    };

    let id = ctx.next_id();
    names.insert(name_key, id);
    sfx.target.put_entry(id, entry)?;
    Ok(Admission::Loaded { id, ancestors })
}

fn be_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

// Emit the attribute index records of `entry` under `id`.
fn emit_attrs(
    ctx: &LoadCtx,
    sfx: &Suffix,
    em: &mut Emitter,
    entry: &Entry,
    id: u64,
    op: Op,
) -> Result<()> {
    for attr in entry.as_attrs() {
        let at = match ctx.schema.lookup(&attr.name) {
            Some(at) => at,
            None => continue,
        };
        for kind in at.kinds.iter() {
            let ikey = at.to_index_key(*kind);
            let index_id = match sfx.attr_ids.get(&ikey) {
                Some(index_id) => *index_id,
                None => continue,
            };
            for key in at.index_keys(*kind, &attr.values) {
                em.emit(index_id, &key, id, op)?;
            }
        }
    }
    Ok(())
}

// Emit naming, children, subtree and attribute records for one
// admitted entry.
fn emit_tree(
    ctx: &LoadCtx,
    sfx: &Suffix,
    em: &mut Emitter,
    entry: &Entry,
    id: u64,
    ancestors: &[u64],
    op: Op,
) -> Result<()> {
    let name_key = entry.as_name().to_sorted_bytes();
    em.emit(sfx.naming_id, &name_key, id, op)?;
    if let Some(parent_id) = ancestors.first() {
        em.emit(sfx.children_id, &be_id(*parent_id), id, op)?;
    }
    for ancestor_id in ancestors.iter() {
        em.emit(sfx.subtree_id, &be_id(*ancestor_id), id, op)?;
    }
    emit_attrs(ctx, sfx, em, entry, id, op)
}

/// The emission half of loading one entry; runs outside the source
/// lock.
pub(crate) fn emit_one(
    ctx: &LoadCtx,
    sfx: &Suffix,
    em: &mut Emitter,
    entry: &Entry,
    admission: &Admission,
) -> Result<()> {
    match admission {
        Admission::Loaded { id, ancestors } => {
            emit_tree(ctx, sfx, em, entry, *id, ancestors, Op::Insert)
        }
        Admission::Replaced { id, old_id, ancestors } => {
            // the old entry's keys net out under delete-before-insert.
            let old = match sfx.target.entry(*old_id)? {
                Some(old) => old,
                None => {
                    return err_at!(
                        StoreFail, msg: "replaced id {} has no entry", old_id
                    )
                }
            };
            emit_tree(ctx, sfx, em, &old, *old_id, ancestors, Op::Delete)?;
            emit_tree(ctx, sfx, em, entry, *id, ancestors, Op::Insert)?;
            debug!(target: "bulkld", "{}, replaced {} with {}", entry.as_name(), old_id, id);
            Ok(())
        }
        Admission::Rejected => Ok(()),
    }
}

// One unit pulled from the shared source under its lock.
enum Step {
    Work(Arc<Suffix>, Box<Entry>, Admission),
    Skip,
    Done,
}

/// Import worker: contend over the shared parser, admit entries under
/// the source lock, emit records outside it. One of W identical
/// tasks.
pub(crate) fn import_task(
    ctx: Arc<LoadCtx>,
    source: Arc<Mutex<Box<dyn EntrySource>>>,
    pool: PoolTx,
    sorter: SorterTx,
) -> Result<()> {
    let mut em = Emitter::new(&ctx, pool, sorter);

    loop {
        if ctx.cancel.load(SeqCst) {
            em.abandon()?;
            return err_at!(Cancelled, msg: "import worker cancelled");
        }

        let step = {
            let mut source = source.lock().unwrap();
            match source.next_entry() {
                Err(err) => {
                    std::mem::drop(source);
                    em.abandon()?;
                    return Err(err);
                }
                Ok(Sourced::Eof) => Step::Done,
                Ok(Sourced::Malformed(msg)) => {
                    ctx.stats.read.fetch_add(1, SeqCst);
                    ctx.stats.rejected.fetch_add(1, SeqCst);
                    debug!(target: "bulkld", "malformed entry: {}", msg);
                    Step::Skip
                }
                Ok(Sourced::Entry(entry)) => {
                    ctx.stats.read.fetch_add(1, SeqCst);
                    match ctx.suffix_of(entry.as_name()) {
                        Some(sfx) if sfx.stream_selects(entry.as_name()) => {
                            let sfx = Arc::clone(sfx);
                            match admit_one(&ctx, &sfx, &entry) {
                                Ok(admission) => Step::Work(sfx, entry, admission),
                                Err(err) => {
                                    std::mem::drop(source);
                                    em.abandon()?;
                                    return Err(err);
                                }
                            }
                        }
                        _ => {
                            ctx.stats.ignored.fetch_add(1, SeqCst);
                            Step::Skip
                        }
                    }
                }
            }
        };

        match step {
            Step::Done => break,
            Step::Skip => continue,
            Step::Work(_, _, Admission::Rejected) => {
                ctx.stats.rejected.fetch_add(1, SeqCst);
            }
            Step::Work(sfx, entry, admission) => {
                match emit_one(&ctx, &sfx, &mut em, &entry, &admission) {
                    Ok(()) => {
                        ctx.stats.loaded.fetch_add(1, SeqCst);
                    }
                    Err(err) => {
                        em.abandon()?;
                        return Err(err);
                    }
                }
            }
        }
    }

    em.flush()
}

// Admit-and-emit for the single-task migration paths; no source lock
// contention, the cursor is private to the task.
fn migrate_one(
    ctx: &LoadCtx,
    sfx: &Arc<Suffix>,
    em: &mut Emitter,
    entry: &Entry,
) -> Result<bool> {
    match admit_one(ctx, sfx, entry)? {
        Admission::Rejected => Ok(false),
        admission => {
            emit_one(ctx, sfx, em, entry, &admission)?;
            Ok(true)
        }
    }
}

/// Migrate entries of the pre-existing container that fall outside
/// every include branch; they are fed through the same admission and
/// emission path under fresh ids. Runs before the import workers.
pub(crate) fn migrate_existing_task(
    ctx: Arc<LoadCtx>,
    sfx: Arc<Suffix>,
    pool: PoolTx,
    sorter: SorterTx,
) -> Result<()> {
    let source = match &sfx.source {
        Some(source) => Arc::clone(source),
        None => return Ok(()),
    };
    let mut em = Emitter::new(&ctx, pool, sorter);

    for (_, entry) in source.entries()? {
        if ctx.cancel.load(SeqCst) {
            em.abandon()?;
            return err_at!(Cancelled, msg: "migration cancelled");
        }
        let name = entry.as_name();
        if !name.is_within(&sfx.base) {
            continue;
        }
        if sfx.includes.iter().any(|i| name.is_within(i)) {
            continue; // rebuilt from the stream instead.
        }
        match migrate_one(&ctx, &sfx, &mut em, &entry) {
            Ok(true) => {
                ctx.stats.migrated.fetch_add(1, SeqCst);
            }
            Ok(false) => {
                ctx.stats.rejected.fetch_add(1, SeqCst);
            }
            Err(err) => {
                em.abandon()?;
                return Err(err);
            }
        }
    }

    em.flush()
}

/// Migrate the survivors of excluded subtrees, in append mode: the
/// stream does not provide them and the rebuild must not lose them.
/// Runs after the import workers so their parents are admitted first.
pub(crate) fn migrate_excluded_task(
    ctx: Arc<LoadCtx>,
    sfx: Arc<Suffix>,
    pool: PoolTx,
    sorter: SorterTx,
) -> Result<()> {
    if !ctx.append || sfx.excludes.is_empty() {
        return Ok(());
    }
    let source = match &sfx.source {
        Some(source) => Arc::clone(source),
        None => return Ok(()),
    };
    let mut em = Emitter::new(&ctx, pool, sorter);

    for (_, entry) in source.entries()? {
        if ctx.cancel.load(SeqCst) {
            em.abandon()?;
            return err_at!(Cancelled, msg: "migration cancelled");
        }
        let name = entry.as_name();
        if !sfx.excludes.iter().any(|x| name.is_within(x)) {
            continue;
        }
        match migrate_one(&ctx, &sfx, &mut em, &entry) {
            Ok(true) => {
                ctx.stats.migrated.fetch_add(1, SeqCst);
            }
            Ok(false) => {
                ctx.stats.rejected.fetch_add(1, SeqCst);
            }
            Err(err) => {
                em.abandon()?;
                return Err(err);
            }
        }
    }

    em.flush()
}
