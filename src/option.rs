//! Tunables for the compaction executor.

/// Configuration for [`crate::compaction::CompactionExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorOption {
    pub(crate) pool_size: usize,
    pub(crate) queue_capacity: usize,
    pub(crate) recompaction_floor: i32,
}

impl Default for ExecutorOption {
    fn default() -> Self {
        ExecutorOption {
            pool_size: 4,
            queue_capacity: 64,
            recompaction_floor: 0,
        }
    }
}

impl ExecutorOption {
    /// Number of worker threads running merges; each blocks for the full
    /// duration of its merge. Clamped to at least one.
    pub fn pool_size(self, pool_size: usize) -> Self {
        ExecutorOption {
            pool_size: pool_size.max(1),
            ..self
        }
    }

    /// Pending requests admitted before submissions are rejected.
    pub fn queue_capacity(self, queue_capacity: usize) -> Self {
        ExecutorOption {
            queue_capacity: queue_capacity.max(1),
            ..self
        }
    }

    /// Store priority at or below which a finished compaction immediately
    /// re-enqueues a follow-up instead of checking for a split.
    pub fn recompaction_floor(self, recompaction_floor: i32) -> Self {
        ExecutorOption {
            recompaction_floor,
            ..self
        }
    }
}
