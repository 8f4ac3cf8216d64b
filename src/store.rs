//! Contracts of the external collaborators the compaction core calls into.
//!
//! The core never owns a region or its server; it holds these handles only
//! for the duration of a request's run. File contents, merge I/O, and split
//! execution all live behind these traits.

use std::{fmt, sync::Arc};

use crate::compaction::{CompactionError, CompactionRequest};

/// Identity of one horizontal partition of the keyspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(i64);

impl RegionId {
    /// Construct a region identity from its raw value.
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw value backing this identity.
    #[inline]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region-{}", self.0)
    }
}

/// Descriptor for one sorted on-disk file, reduced to what scheduling reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreFileHandle {
    /// Stable file identifier, assigned by the owning store.
    pub id: u64,
    /// On-disk size in bytes.
    pub len: u64,
}

impl StoreFileHandle {
    /// Build a handle from its parts.
    pub const fn new(id: u64, len: u64) -> Self {
        Self { id, len }
    }
}

/// Per-column-family sorted-file set within a region.
///
/// `compact` performs the actual merge and blocks its calling thread for the
/// duration; it returns whether a merged result was produced (`false` means
/// the attempt was a no-op, e.g. nothing eligible). A failed merge must
/// leave the store's file set unchanged.
pub trait Store: Send + Sync {
    /// Region this store belongs to.
    fn region_id(&self) -> RegionId;

    /// Attempt the merge described by `request`.
    fn compact(&self, request: &CompactionRequest) -> Result<bool, CompactionError>;

    /// Current compaction-eligibility priority; at or below the configured
    /// floor means the store is still over-eligible after a merge.
    fn compact_priority(&self) -> i32;

    /// Release the scheduling slot held by `request`. Called exactly once
    /// per request, on every terminal path.
    fn finish_request(&self, request: &CompactionRequest);
}

/// Process-level services of the hosting server.
pub trait RegionHost: Send + Sync {
    /// Whether the hosting process is shutting down.
    fn is_stopped(&self) -> bool;

    /// Trigger a best-effort filesystem health diagnostic.
    fn check_file_system(&self);

    /// Ask the maintenance policy to schedule another compaction for
    /// `store`.
    fn request_compaction(&self, region: RegionId, store: Arc<dyn Store>, reason: &str);

    /// Ask for a split-eligibility check on `region`.
    fn request_split(&self, region: RegionId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_id_displays_with_prefix() {
        assert_eq!(RegionId::new(42).to_string(), "region-42");
        assert_eq!(RegionId::new(-1).to_string(), "region--1");
    }

    #[test]
    fn store_file_handles_compare_by_value() {
        assert_eq!(StoreFileHandle::new(1, 100), StoreFileHandle::new(1, 100));
        assert_ne!(StoreFileHandle::new(1, 100), StoreFileHandle::new(2, 100));
    }
}
