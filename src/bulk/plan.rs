//! Module `plan` budget the available memory across the import.
//!
//! Phase 1 splits a 45% share of available memory between the store
//! cache, the store's log buffer and `2 * indexes * workers` sort
//! buffers. When the buffers would fall below the floor the planner
//! falls back to a minimal store cache and a disabled log buffer, and
//! as a last resort pins the buffers at the floor and warns. Phase 2
//! splits a 50% share equally among all spill runs as per-cursor
//! read-ahead.

use log::{info, warn};

use std::cmp;

use crate::{Error, Result};

/// Imports below this much available memory abort up front.
pub const MIN_AVAIL_MEMORY: usize = 16 * 1024 * 1024;

/// Store cache target cap.
pub const MAX_STORE_CACHE: usize = 128 * 1024 * 1024;

/// Store log-buffer target cap.
pub const MAX_LOG_BUFFER: usize = 100 * 1024 * 1024;

/// Fallback store cache when buffers would starve.
pub const FALLBACK_STORE_CACHE: usize = 16 * 1024 * 1024;

/// Sort-buffer floor and ceiling.
pub const MIN_BUFFER_SIZE: usize = 100 * 1024;
pub const MAX_BUFFER_SIZE: usize = 48 * 1024 * 1024;

/// Phase-2 read-ahead floor per run cursor.
pub const MIN_READ_AHEAD: usize = 4 * 1024;

const PHASE1_SHARE: f64 = 0.45;
const PHASE2_SHARE: f64 = 0.50;

/// Phase-1 memory plan.
#[derive(Clone, Debug, PartialEq)]
pub struct MemPlan {
    pub avail: usize,
    /// Number of pooled sort buffers, `2 * indexes * workers`.
    pub buffers: usize,
    pub buf_size: usize,
    pub store_cache: usize,
    /// Zero when the log buffer is disabled.
    pub log_buffer: usize,
}

/// Available memory of this process, from the operating system.
pub fn avail_memory() -> Result<usize> {
    let mem = err_at!(Fatal, sys_info::mem_info())?;
    use std::convert::TryFrom;
    Ok(usize::try_from(mem.avail).unwrap().saturating_mul(1024))
}

pub fn plan_phase1(avail: usize, n_indexes: usize, workers: usize) -> Result<MemPlan> {
    if avail < MIN_AVAIL_MEMORY {
        return err_at!(
            Fatal, msg: "available memory {} below minimum {}", avail, MIN_AVAIL_MEMORY
        );
    }

    let buffers = 2 * n_indexes * workers;
    let share = (avail as f64 * PHASE1_SHARE) as usize;
    let solve = |store_cache: usize, log_buffer: usize| -> usize {
        cmp::min(
            share.saturating_sub(store_cache + log_buffer) / cmp::max(1, buffers),
            MAX_BUFFER_SIZE,
        )
    };

    let mut store_cache = cmp::min(avail, MAX_STORE_CACHE);
    let mut log_buffer = cmp::min(avail, MAX_LOG_BUFFER);
    let mut buf_size = solve(store_cache, log_buffer);

    if buf_size < MIN_BUFFER_SIZE {
        store_cache = FALLBACK_STORE_CACHE;
        log_buffer = 0;
        buf_size = solve(store_cache, log_buffer);
    }
    if buf_size < MIN_BUFFER_SIZE {
        buf_size = MIN_BUFFER_SIZE;
        warn!(
            target: "bulkld",
            "buffers {}x{} overcommit the phase-1 share {}", buffers, buf_size, share
        );
    }

    let val = MemPlan {
        avail,
        buffers,
        buf_size,
        store_cache,
        log_buffer,
    };
    info!(
        target: "bulkld",
        "memory plan: avail {} buffers {}x{} store-cache {} log-buffer {}",
        val.avail, val.buffers, val.buf_size, val.store_cache, val.log_buffer
    );
    Ok(val)
}

/// Per-cursor read-ahead for phase 2: an equal split of the phase-2
/// share (or of the configured direct-buffer slab) across all spill
/// runs, floored at 4KiB and capped at the phase-1 buffer size.
pub fn plan_phase2(
    avail: usize,
    n_runs: usize,
    buf_size: usize,
    direct_buffer: Option<usize>,
) -> usize {
    let budget = match direct_buffer {
        Some(n) => n,
        None => (avail as f64 * PHASE2_SHARE) as usize,
    };
    let each = budget / cmp::max(1, n_runs);
    cmp::max(MIN_READ_AHEAD, cmp::min(each, buf_size))
}

#[cfg(test)]
#[path = "plan_test.rs"]
mod plan_test;
