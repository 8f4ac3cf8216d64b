#![deny(missing_docs)]
//! Sorted, multi-versioned key-value storage core for an LSM-style
//! distributed database.
//!
//! Two tightly coupled subsystems live here. The [`cell`] module defines
//! the canonical byte layout of a versioned record and the single global
//! sort order every storage structure must reproduce exactly. The
//! [`compaction`] module schedules groups of sorted files for merging:
//! request ordering, per-region in-flight tracking, and a bounded worker
//! pool with leak-free rejection.
//!
//! Everything this core calls into — file contents, merge I/O, region and
//! server lifecycle — sits behind the traits in [`store`].

/// Versioned records, their byte layout, and the global sort order.
pub mod cell;

/// Compaction request lifecycle, tracking, and bounded execution.
pub mod compaction;

mod logging;

/// Executor tunables.
pub mod option;

/// Contracts of the external collaborators this core drives.
pub mod store;

pub use cell::{codec::CellCursor, Cell, CellType};
pub use compaction::{
    CompactionExecutor, CompactionOutcome, CompactionRequest, CompactionState, CompactionTracker,
};
pub use option::ExecutorOption;
pub use store::{RegionHost, RegionId, Store, StoreFileHandle};
