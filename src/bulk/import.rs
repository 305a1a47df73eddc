//! Module `import` implement the orchestrator: suffix initialization,
//! memory planning, the phase-1 fan-out, the phase-2 merges, trusted
//! marking and the container swap.

use log::{error, info, warn};

use std::{
    cmp,
    collections::HashMap,
    convert::TryFrom,
    ffi, fs,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering::SeqCst},
        Arc, Mutex,
    },
    thread, time,
};

use crate::{
    bulk::buffer::BufPool,
    bulk::config::{Config, SHADOW_SUFFIX},
    bulk::key::{Comparator, IndexKey, IndexType},
    bulk::merge::{self, MergeJob, NamingMerge},
    bulk::plan,
    bulk::sorter::{Sorter, SpillBank},
    bulk::spill::RunSpan,
    bulk::worker::{self, ImportStats, LoadCtx, Suffix},
    entry::EntrySource,
    name::Name,
    schema::Schema,
    store::{Container, Index, Store},
    Error, Result,
};

// One registered index stream; the vector offset is the index-id.
struct RegEntry {
    key: IndexKey,
    ord: usize,
    index: Arc<dyn Index>,
    cmp: Comparator,
    naming: bool,
}

/// Final summary of one import run.
#[derive(Clone, Debug)]
pub struct ImportReport {
    pub entries_read: u64,
    pub entries_loaded: u64,
    pub entries_ignored: u64,
    pub entries_rejected: u64,
    pub entries_migrated: u64,
    pub elapsed: time::Duration,
    /// Entries read per second.
    pub rate: f64,
}

/// The bulk-import orchestrator. One instance drives one import into
/// one store; the store must be exclusive to this process for the
/// duration.
pub struct Importer {
    config: Config,
    store: Arc<dyn Store>,
    schema: Arc<Schema>,
    cancel: Arc<AtomicBool>,
}

impl Importer {
    pub fn new(config: Config, store: Arc<dyn Store>, schema: Schema) -> Result<Importer> {
        config.validate()?;
        Ok(Importer {
            config,
            store,
            schema: Arc::new(schema),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Cooperative cancellation. Workers poll between entries, mergers
    /// between records; the run surfaces `Cancelled` and every rebuilt
    /// index stays not-trusted.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run(&mut self, source: Box<dyn EntrySource>) -> Result<ImportReport> {
        let start = time::Instant::now();
        match self.run_phases(source, start) {
            Ok(report) => Ok(report),
            Err(err) => {
                self.cancel.store(true, SeqCst);
                error!(target: "bulkld", "import failed: {}", err);
                if !err.is_cancelled() {
                    // cancellation keeps temp files for diagnosis.
                    fs::remove_dir_all(&self.config.temp_dir).ok();
                }
                Err(err)
            }
        }
    }

    fn run_phases(
        &mut self,
        source: Box<dyn EntrySource>,
        start: time::Instant,
    ) -> Result<ImportReport> {
        let workers = self.config.to_thread_count();
        err_at!(IOError, fs::create_dir_all(&self.config.temp_dir))?;

        let (suffixes, registry) = self.init_suffixes()?;
        let n_indexes = registry.len();
        info!(
            target: "bulkld",
            "{} suffixes, {} indexes, {} workers", suffixes.len(), n_indexes, workers
        );

        let avail = match self.config.avail_memory {
            Some(bytes) => bytes,
            None => plan::avail_memory()?,
        };
        let mplan = plan::plan_phase1(avail, n_indexes, workers)?;

        // id assignment continues past anything already in the
        // targets, an appending import must not reuse ids.
        let mut first_id = 1;
        for sfx in suffixes.iter() {
            first_id = cmp::max(first_id, sfx.target.last_entry_id()? + 1);
        }

        let stats = Arc::new(ImportStats::new());
        let ctx = Arc::new(LoadCtx {
            skip_validation: self.config.skip_name_validation,
            replace_existing: self.config.replace_existing_entries,
            append: self.config.append_to_existing,
            schema: Arc::clone(&self.schema),
            suffixes: suffixes.clone(),
            cmps: registry.iter().map(|reg| reg.cmp).collect(),
            seq: AtomicU64::new(first_id),
            cancel: Arc::clone(&self.cancel),
            stats: Arc::clone(&stats),
        });

        let done = Arc::new(AtomicBool::new(false));
        let progress = spawn_progress(
            Arc::clone(&stats),
            Arc::clone(&done),
            Arc::clone(&self.cancel),
            self.config.progress_interval,
            start,
        );

        // phase 1: declaration order doubles as tear-down order on the
        // error path (sorter joins before the bank, the bank before
        // the pool).
        let pool = BufPool::new(mplan.buffers, mplan.buf_size);
        let bank = Arc::new(SpillBank::new(
            self.config.temp_dir.as_os_str(),
            self.config.spill_queue_size,
            pool.handle(),
            registry.iter().map(|reg| (reg.ord, reg.key.name())).collect(),
        ));
        let sorter = Sorter::new(workers, self.config.spill_queue_size, Arc::clone(&bank));

        self.phase1(&ctx, source, workers, &pool, &sorter)?;

        sorter.close_wait()?;
        let bank = match Arc::try_unwrap(bank) {
            Ok(bank) => bank,
            Err(_) => return err_at!(Fatal, msg: "spill bank still shared after drain"),
        };
        let runs = bank.close()?;
        pool.close()?;

        // phase 2
        let total_runs: usize = runs.values().map(|(_, spans)| spans.len()).sum();
        let read_ahead = plan::plan_phase2(
            avail,
            total_runs,
            mplan.buf_size,
            self.config.direct_buffer_size,
        );
        let merge_rejected = self.phase2(&ctx, &registry, runs, read_ahead)?;
        reconcile_rejections(&stats, merge_rejected);

        for reg in registry.iter() {
            reg.index.set_trusted(true)?;
        }
        self.swap_containers(&suffixes)?;

        done.store(true, SeqCst);
        progress.join().ok();

        fs::remove_dir_all(&self.config.temp_dir).ok();

        let elapsed = start.elapsed();
        let report = ImportReport {
            entries_read: stats.read.load(SeqCst),
            entries_loaded: stats.loaded.load(SeqCst),
            entries_ignored: stats.ignored.load(SeqCst),
            entries_rejected: stats.rejected.load(SeqCst),
            entries_migrated: stats.migrated.load(SeqCst),
            elapsed,
            rate: stats.read.load(SeqCst) as f64 / elapsed.as_secs_f64().max(1e-6),
        };
        info!(
            target: "bulkld",
            "import done: {} read, {} loaded, {} ignored, {} rejected, {} migrated, {:.1}s, {:.0}/s",
            report.entries_read, report.entries_loaded, report.entries_ignored,
            report.entries_rejected, report.entries_migrated,
            report.elapsed.as_secs_f64(), report.rate
        );
        Ok(report)
    }

    // Suffix initialization: containers, shadow targets, per-suffix
    // index registration. Every rebuilt index is marked not-trusted
    // here, before the first record flows.
    fn init_suffixes(&self) -> Result<(Vec<Arc<Suffix>>, Vec<RegEntry>)> {
        let includes = parse_branches(&self.config.include_branches, "include")?;
        let excludes = parse_branches(&self.config.exclude_branches, "exclude")?;

        let mut suffixes = vec![];
        let mut registry: Vec<RegEntry> = vec![];

        for (ord, base_text) in self.config.suffixes.iter().enumerate() {
            let base = match Name::try_from(base_text.as_str()) {
                Ok(base) => base,
                Err(_) => return err_at!(InvalidConfig, msg: "bad suffix {:?}", base_text),
            };

            // includes are minimized: an include under another include
            // is redundant.
            let all_includes: Vec<Name> = includes
                .iter()
                .filter(|i| i.is_within(&base))
                .cloned()
                .collect();
            let mut sfx_includes: Vec<Name> = vec![];
            for i in all_includes.iter() {
                if !all_includes.iter().any(|j| j.is_ancestor_of(i)) {
                    sfx_includes.push(i.clone());
                }
            }

            let sfx_excludes: Vec<Name> = excludes
                .iter()
                .filter(|x| x.is_within(&base))
                .cloned()
                .collect();
            for x in sfx_excludes.iter() {
                if !sfx_includes.iter().any(|i| x.is_within(i)) {
                    return err_at!(
                        InvalidConfig, msg: "exclude {} not under any include branch", x
                    );
                }
            }

            // an include equal to the base is a full rebuild: clear the
            // container instead of migrating around a shadow.
            let rewrite =
                !sfx_includes.is_empty() && !sfx_includes.iter().any(|i| *i == base);

            let (target, source) = if rewrite {
                let source = self.store.lookup(base_text);
                let shadow_name = format!("{}{}", base_text, SHADOW_SUFFIX);
                self.store.remove(&shadow_name).ok(); // stale shadow
                (self.store.open(&shadow_name)?, source)
            } else {
                let target = self.store.open(base_text)?;
                if self.config.clear_backend || !self.config.append_to_existing {
                    target.clear()?;
                }
                (target, None)
            };

            let push = |registry: &mut Vec<RegEntry>, key: IndexKey| -> Result<u32> {
                let index = target.index(&key)?;
                index.set_trusted(false)?;
                let id = u32::try_from(registry.len()).unwrap();
                registry.push(RegEntry {
                    naming: key.kind == IndexType::Naming,
                    cmp: key.comparator(),
                    ord,
                    index,
                    key,
                });
                Ok(id)
            };

            let naming_id = push(&mut registry, IndexKey::naming())?;
            let children_id = push(&mut registry, IndexKey::children())?;
            let subtree_id = push(&mut registry, IndexKey::subtree())?;

            let mut attr_ids = HashMap::new();
            let mut attrs: Vec<_> = self.schema.iter().collect();
            attrs.sort_by(|a, b| a.name.cmp(&b.name));
            for at in attrs {
                for kind in at.kinds.iter() {
                    let ikey = at.to_index_key(*kind);
                    let id = push(&mut registry, ikey.clone())?;
                    attr_ids.insert(ikey, id);
                }
            }

            let naming_index = registry[naming_id as usize].index.clone();
            suffixes.push(Arc::new(Suffix {
                ord,
                base_key: base.to_sorted_bytes(),
                base,
                target,
                source,
                includes: sfx_includes,
                excludes: sfx_excludes,
                naming_index,
                naming_id,
                children_id,
                subtree_id,
                attr_ids,
                names: Mutex::new(std::collections::BTreeMap::new()),
            }));
        }
        Ok((suffixes, registry))
    }

    fn phase1(
        &self,
        ctx: &Arc<LoadCtx>,
        source: Box<dyn EntrySource>,
        workers: usize,
        pool: &BufPool,
        sorter: &Sorter,
    ) -> Result<()> {
        // migrate everything outside the include branches, before the
        // stream is ingested.
        for sfx in ctx.suffixes.iter() {
            worker::migrate_existing_task(
                Arc::clone(ctx),
                Arc::clone(sfx),
                pool.handle(),
                sorter.sender(),
            )?;
        }

        let source: Arc<Mutex<Box<dyn EntrySource>>> = Arc::new(Mutex::new(source));
        let mut handles = vec![];
        for i in 0..workers {
            let (ctx, source) = (Arc::clone(ctx), Arc::clone(&source));
            let (ptx, stx) = (pool.handle(), sorter.sender());
            let handle = err_at!(
                ThreadFail,
                thread::Builder::new()
                    .name(format!("import-{}", i))
                    .spawn(move || worker::import_task(ctx, source, ptx, stx))
            )?;
            handles.push(handle);
        }

        let mut first_err: Option<Error> = None;
        for handle in handles {
            let res = match handle.join() {
                Ok(res) => res,
                Err(_) => err_at!(ThreadFail, msg: "import worker panicked"),
            };
            if let Err(err) = res {
                self.cancel.store(true, SeqCst);
                // the most diagnostic error wins over follow-up
                // cancellations.
                match &first_err {
                    Some(e) if !e.is_cancelled() => (),
                    _ => first_err = Some(err),
                }
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        // excluded-subtree survivors migrate after the main ingest so
        // their rebuilt parents are admitted first.
        for sfx in ctx.suffixes.iter() {
            worker::migrate_excluded_task(
                Arc::clone(ctx),
                Arc::clone(sfx),
                pool.handle(),
                sorter.sender(),
            )?;
        }
        Ok(())
    }

    // One merge task per index; the naming stream switches to the
    // reconstructing merger when phase 1 skipped validation. Returns
    // the number of entries rejected during the merges.
    fn phase2(
        &self,
        ctx: &Arc<LoadCtx>,
        registry: &[RegEntry],
        runs: HashMap<u32, (ffi::OsString, Vec<RunSpan>)>,
        read_ahead: usize,
    ) -> Result<u64> {
        info!(
            target: "bulkld",
            "phase 2: {} indexes with runs, read-ahead {}", runs.len(), read_ahead
        );

        let mut handles = vec![];
        for (index_id, (loc, spans)) in runs.into_iter() {
            let reg = &registry[index_id as usize];
            let job = MergeJob {
                index_id,
                name: reg.key.name(),
                loc,
                spans,
                index: Arc::clone(&reg.index),
                cmp: reg.cmp,
                read_ahead,
                naming: reg.naming,
            };
            let cancel = Arc::clone(&self.cancel);

            let handle = if reg.naming && ctx.skip_validation {
                let sfx = &ctx.suffixes[reg.ord];
                let nm = NamingMerge {
                    base_key: sfx.base_key.clone(),
                    children: Arc::clone(&registry[sfx.children_id as usize].index),
                    subtree: Arc::clone(&registry[sfx.subtree_id as usize].index),
                    replace_existing: ctx.replace_existing,
                    job,
                };
                err_at!(
                    ThreadFail,
                    thread::Builder::new()
                        .name(format!("merge-{}", nm.job.name))
                        .spawn(move || nm.run(cancel))
                )?
            } else {
                err_at!(
                    ThreadFail,
                    thread::Builder::new()
                        .name(format!("merge-{}", job.name))
                        .spawn(move || merge::merge_task(job, cancel))
                )?
            };
            handles.push(handle);
        }

        let mut rejected = 0;
        let mut first_err: Option<Error> = None;
        for handle in handles {
            let res = match handle.join() {
                Ok(res) => res,
                Err(_) => err_at!(ThreadFail, msg: "merge task panicked"),
            };
            match res {
                Ok(stats) => rejected += stats.rejected,
                Err(err) => {
                    self.cancel.store(true, SeqCst);
                    match &first_err {
                        Some(e) if !e.is_cancelled() => (),
                        _ => first_err = Some(err),
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(rejected),
        }
    }

    // Swap shadow containers into place: lock the original, delete it,
    // rename the shadow to the canonical name. If the registered
    // container is not the shadow this import created, restore and
    // skip.
    fn swap_containers(&self, suffixes: &[Arc<Suffix>]) -> Result<()> {
        for sfx in suffixes.iter() {
            let target_name = sfx.target.to_name();
            let canonical = match target_name.strip_suffix(SHADOW_SUFFIX) {
                Some(canonical) => canonical.to_string(),
                None => continue,
            };

            let orig = self.store.lookup(&canonical);
            if let Some(orig) = &orig {
                orig.lock()?;
            }
            match self.store.lookup(&target_name) {
                Some(got) if Arc::ptr_eq(&got, &sfx.target) => {
                    if orig.is_some() {
                        self.store.remove(&canonical)?;
                    }
                    self.store.rename(&target_name, &canonical)?;
                    info!(target: "bulkld", "{:?}, swapped in rebuilt container", canonical);
                }
                _ => {
                    warn!(
                        target: "bulkld",
                        "{:?}, registered container is not this import's shadow, skipping swap",
                        target_name
                    );
                    if let Some(orig) = &orig {
                        orig.unlock()?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_branches(texts: &[String], what: &str) -> Result<Vec<Name>> {
    let mut branches = vec![];
    for text in texts {
        match Name::try_from(text.as_str()) {
            Ok(name) => branches.push(name),
            Err(_) => return err_at!(InvalidConfig, msg: "bad {} branch {:?}", what, text),
        }
    }
    Ok(branches)
}

// Entries rejected during phase-2 merges were counted loaded (or
// migrated) by phase 1; move them over so that
// read = loaded + rejected + ignored stays true.
fn reconcile_rejections(stats: &ImportStats, merge_rejected: u64) {
    if merge_rejected == 0 {
        return;
    }
    stats.rejected.fetch_add(merge_rejected, SeqCst);
    let from_loaded = cmp::min(stats.loaded.load(SeqCst), merge_rejected);
    stats.loaded.fetch_sub(from_loaded, SeqCst);
    let rest = merge_rejected - from_loaded;
    if rest > 0 {
        let from_migrated = cmp::min(stats.migrated.load(SeqCst), rest);
        stats.migrated.fetch_sub(from_migrated, SeqCst);
    }
}

fn spawn_progress(
    stats: Arc<ImportStats>,
    done: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    interval: u64,
    start: time::Instant,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let interval = time::Duration::from_secs(cmp::max(1, interval));
        let mut last = time::Instant::now();
        while !done.load(SeqCst) && !cancel.load(SeqCst) {
            thread::sleep(time::Duration::from_millis(100));
            if last.elapsed() < interval {
                continue;
            }
            last = time::Instant::now();
            let read = stats.read.load(SeqCst);
            let rate = read as f64 / start.elapsed().as_secs_f64().max(1e-6);
            info!(
                target: "bulkld",
                "progress: {} read, {} ignored, {} rejected, {} migrated, {:.0}/s, free-mem {}",
                read,
                stats.ignored.load(SeqCst),
                stats.rejected.load(SeqCst),
                stats.migrated.load(SeqCst),
                rate,
                plan::avail_memory().unwrap_or(0)
            );
        }
    })
}

#[cfg(test)]
#[path = "import_test.rs"]
mod import_test;
