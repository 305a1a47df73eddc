use serde::Deserialize;

use std::{ffi, path};

use crate::{bulk::spill::SPILL_QUEUE_SIZE, util, Error, Result};

/// Progress records are logged this often, in seconds.
pub const PROGRESS_INTERVAL: u64 = 10;

/// Registered name of a suffix's shadow container while an
/// include-branch rewrite is in flight.
pub const SHADOW_SUFFIX: &str = ";import-tmp";

/// Configuration for one bulk import.
///
/// Configuration is used only while an import runs; nothing of it is
/// persisted. Use the `set_*` methods to refine a value constructed
/// with [Config::new], or load the whole thing from a toml file with
/// [Config::from_file].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base names of the suffixes to load, one container each.
    pub suffixes: Vec<String>,
    /// Directory for run files; deleted on success.
    pub temp_dir: path::PathBuf,
    /// Worker count; `None` resolves to `2 * cores`.
    pub thread_count: Option<usize>,
    /// Skip parent lookups in phase 1; the naming merger reconstructs
    /// and validates parent relationships during phase 2.
    pub skip_name_validation: bool,
    /// Keep existing container content instead of clearing it.
    pub append_to_existing: bool,
    /// A duplicate name replaces the earlier entry instead of being
    /// rejected.
    pub replace_existing_entries: bool,
    /// Clear every target container before loading.
    pub clear_backend: bool,
    /// Rebuild only these branches from the stream; everything outside
    /// them is migrated from the existing container.
    pub include_branches: Vec<String>,
    /// Branches (under some include) excluded from the rebuild.
    pub exclude_branches: Vec<String>,
    /// Phase-2 read-ahead slab; when set it replaces the planner's
    /// phase-2 memory share and is carved equally across run cursors.
    pub direct_buffer_size: Option<usize>,
    /// Available-memory override, mainly for tests; `None` asks the
    /// operating system.
    pub avail_memory: Option<usize>,
    /// Depth of each spill writer's intake queue.
    pub spill_queue_size: usize,
    /// Seconds between progress records.
    pub progress_interval: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            suffixes: vec![],
            temp_dir: std::env::temp_dir().join("dirload"),
            thread_count: None,
            skip_name_validation: false,
            append_to_existing: false,
            replace_existing_entries: false,
            clear_backend: false,
            include_branches: vec![],
            exclude_branches: vec![],
            direct_buffer_size: None,
            avail_memory: None,
            spill_queue_size: SPILL_QUEUE_SIZE,
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

impl Config {
    pub fn new(temp_dir: &ffi::OsStr, suffixes: &[&str]) -> Config {
        Config {
            suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
            temp_dir: path::PathBuf::from(temp_dir),
            ..Config::default()
        }
    }

    /// Load a configuration from a toml file.
    pub fn from_file<P: AsRef<path::Path>>(loc: P) -> Result<Config> {
        util::files::load_toml(loc)
    }

    pub fn set_thread_count(&mut self, threads: usize) -> &mut Self {
        self.thread_count = Some(threads);
        self
    }

    pub fn set_skip_name_validation(&mut self, skip: bool) -> &mut Self {
        self.skip_name_validation = skip;
        self
    }

    pub fn set_append_to_existing(&mut self, append: bool) -> &mut Self {
        self.append_to_existing = append;
        self
    }

    pub fn set_replace_existing(&mut self, replace: bool) -> &mut Self {
        self.replace_existing_entries = replace;
        self
    }

    pub fn set_clear_backend(&mut self, clear: bool) -> &mut Self {
        self.clear_backend = clear;
        self
    }

    pub fn set_include_branches(&mut self, branches: &[&str]) -> &mut Self {
        self.include_branches = branches.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn set_exclude_branches(&mut self, branches: &[&str]) -> &mut Self {
        self.exclude_branches = branches.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn set_direct_buffer_size(&mut self, bytes: usize) -> &mut Self {
        self.direct_buffer_size = Some(bytes);
        self
    }

    pub fn set_avail_memory(&mut self, bytes: usize) -> &mut Self {
        self.avail_memory = Some(bytes);
        self
    }

    /// Resolved worker count.
    pub fn to_thread_count(&self) -> usize {
        match self.thread_count {
            Some(n) => n,
            None => 2 * num_cpus::get(),
        }
    }

    /// Up-front validation; every violation here is fatal before
    /// phase 1.
    pub fn validate(&self) -> Result<()> {
        if self.suffixes.is_empty() {
            return err_at!(InvalidConfig, msg: "no suffixes configured");
        }
        if let Some(0) = self.thread_count {
            return err_at!(InvalidConfig, msg: "thread-count must be positive");
        }
        if self.temp_dir.as_os_str().is_empty() {
            return err_at!(InvalidConfig, msg: "temp-directory not set");
        }
        if self.skip_name_validation && self.append_to_existing {
            // merge-time reconstruction sees only this import's records,
            // an append-mode reconstruction would be partial.
            return err_at!(
                InvalidConfig, msg: "skip-name-validation cannot append to existing data"
            );
        }
        if self.clear_backend && self.append_to_existing {
            return err_at!(InvalidConfig, msg: "clear-backend contradicts append-to-existing");
        }
        if !self.exclude_branches.is_empty() && self.include_branches.is_empty() {
            return err_at!(InvalidConfig, msg: "exclude-branches without include-branches");
        }
        Ok(())
    }
}
