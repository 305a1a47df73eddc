//! Module `bulk` implement the two-phase bulk import engine.
//!
//! Phase 1 fan-out:
//!
//! ```text
//! entry source -> import/migration workers -> sort buffers (per worker,
//! per index) -> sort executor -> spill-run writer (one per index) ->
//! run files (sorted runs)
//! ```
//!
//! Phase 2, per index: k-way merge of the sorted runs, aggregation of
//! duplicate keys into posting lists, bulk-insert into the store. The
//! naming merger additionally reconstructs the children/subtree
//! posting lists when the workers imported without name validation.
//!
//! The [Importer] sequences both phases; [Config] carries the
//! recognized options.

pub mod buffer;
pub mod idset;
pub mod key;
pub mod merge;
pub mod plan;
pub mod sorter;
pub mod spill;
pub mod worker;

mod config;
mod import;

pub use config::Config;
pub use import::{ImportReport, Importer};
