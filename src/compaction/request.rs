//! Schedulable compaction requests: strict ordering, state machine, and the
//! run-to-completion protocol.
//!
//! A request plays two independent roles that share one type: an ordering
//! relation consumed only by the executor's priority queue, and an
//! executable task consumed only by worker threads. Neither role knows
//! about the other.

use std::{
    cmp::Ordering,
    fmt,
    sync::{
        atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering as AtomicOrdering},
        Arc,
    },
    time::Instant,
};

use log::Level;

use super::{CompactionError, CompactionTracker};
use crate::{
    logging::store_log,
    store::{RegionHost, RegionId, Store, StoreFileHandle},
};

/// Priority assigned to user-initiated requests; maintenance policies use
/// lower (more urgent) values when stores fall behind.
pub const USER_PRIORITY: i32 = 1;

/// Reason tag attached when a finished merge immediately re-enqueues.
pub(crate) const RECURSIVE_REASON: &str = "recursive enqueue";

/// Process-wide creation sequence; the deterministic final tie-break for
/// requests created within the same nanosecond.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Lifecycle state of a request. A terminal state is reached exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    /// Constructed, possibly queued, not yet picked up.
    Pending = 0,
    /// A worker thread is driving the merge.
    Running = 1,
    /// Terminal: ran to completion, abort, or failure.
    Completed = 2,
    /// Terminal: never admitted (executor saturated or shut down).
    Rejected = 3,
}

impl RequestState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            _ => Self::Rejected,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }
}

/// What a request's execution amounted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// The merge ran; `reduced` reports whether it produced a merged result
    /// (`false` means the attempt was a no-op).
    Completed {
        /// Whether the store's file count actually went down.
        reduced: bool,
    },
    /// The host was stopping; nothing was attempted.
    Aborted,
    /// The merge failed; the store's file set is unchanged and a filesystem
    /// health check was triggered. Failed requests are not retried here.
    Failed,
}

/// One candidate group of sorted files selected for merging.
///
/// The selection is immutable for the life of the request; `total_size` is
/// computed once at construction. Priority may be adjusted until a worker
/// picks the request up, never after.
pub struct CompactionRequest {
    region: RegionId,
    store: Arc<dyn Store>,
    host: Arc<dyn RegionHost>,
    selection: Vec<StoreFileHandle>,
    total_size: u64,
    is_major: bool,
    priority: AtomicI32,
    created_at: Instant,
    seq: u64,
    state: AtomicU8,
}

impl CompactionRequest {
    /// Build a request over a non-empty file selection.
    ///
    /// Fails fast with [`CompactionError::EmptySelection`] when no files
    /// were selected; nothing is scheduled or registered in that case.
    pub fn new(
        store: Arc<dyn Store>,
        host: Arc<dyn RegionHost>,
        selection: Vec<StoreFileHandle>,
        is_major: bool,
    ) -> Result<Self, CompactionError> {
        if selection.is_empty() {
            return Err(CompactionError::EmptySelection);
        }
        let total_size = selection.iter().map(|file| file.len).sum();
        Ok(Self {
            region: store.region_id(),
            store,
            host,
            selection,
            total_size,
            is_major,
            priority: AtomicI32::new(USER_PRIORITY),
            created_at: Instant::now(),
            seq: NEXT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            state: AtomicU8::new(RequestState::Pending as u8),
        })
    }

    /// Region owning the selected files.
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// The selected files, in selection order.
    pub fn selection(&self) -> &[StoreFileHandle] {
        &self.selection
    }

    /// Sum of the selected files' on-disk sizes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Whether this merges the store's full file set.
    pub fn is_major(&self) -> bool {
        self.is_major
    }

    /// Current scheduling priority; lower values are served first.
    pub fn priority(&self) -> i32 {
        self.priority.load(AtomicOrdering::Acquire)
    }

    /// Adjust the priority of a still-pending request. Returns `false`
    /// without effect once execution has started.
    pub fn set_priority(&self, priority: i32) -> bool {
        if self.state() != RequestState::Pending {
            return false;
        }
        self.priority.store(priority, AtomicOrdering::Release);
        true
    }

    /// Monotonic creation time, used only for scheduling tie-breaks.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        RequestState::from_raw(self.state.load(AtomicOrdering::Acquire))
    }

    /// Run the merge to completion on the calling thread.
    ///
    /// The protocol: bail out if the host is stopping; otherwise drive the
    /// store's merge, then either re-enqueue a follow-up compaction (store
    /// still at or below `recompaction_floor`) or request a split check.
    /// I/O failures are contained here: they log, trigger a filesystem
    /// health check, and terminate this one request as [`CompactionOutcome::Failed`].
    ///
    /// On every exit path, including panics in the merge, the store's
    /// scheduling slot is released and the tracker count is decremented
    /// exactly once.
    pub fn run(&self, tracker: &CompactionTracker, recompaction_floor: i32) -> CompactionOutcome {
        let _release = SlotRelease {
            request: self,
            tracker,
        };

        if self.host.is_stopped() {
            self.set_terminal(RequestState::Completed);
            store_log!(
                Level::Info,
                "compaction.abort",
                "{} host stopping, skipped {} file(s)",
                self.region,
                self.selection.len(),
            );
            return CompactionOutcome::Aborted;
        }

        self.mark_running();
        let started = Instant::now();
        match self.store.compact(self) {
            Ok(reduced) => {
                store_log!(
                    Level::Info,
                    "compaction.finish",
                    "{} major={} files={} size={} reduced={} took_ms={}",
                    self.region,
                    self.is_major,
                    self.selection.len(),
                    self.total_size,
                    reduced,
                    started.elapsed().as_millis(),
                );
                if self.store.compact_priority() <= recompaction_floor {
                    self.host.request_compaction(
                        self.region,
                        Arc::clone(&self.store),
                        RECURSIVE_REASON,
                    );
                } else {
                    self.host.request_split(self.region);
                }
                self.set_terminal(RequestState::Completed);
                CompactionOutcome::Completed { reduced }
            }
            Err(err) => {
                store_log!(
                    Level::Error,
                    "compaction.fail",
                    "{} major={} files={} took_ms={}: {}",
                    self.region,
                    self.is_major,
                    self.selection.len(),
                    started.elapsed().as_millis(),
                    err,
                );
                self.host.check_file_system();
                self.set_terminal(RequestState::Completed);
                CompactionOutcome::Failed
            }
        }
    }

    /// Terminal path for requests the executor never admits; releases the
    /// store slot and tracker count exactly once.
    pub(crate) fn reject(&self, tracker: &CompactionTracker) {
        if !self.set_terminal(RequestState::Rejected) {
            return;
        }
        store_log!(
            Level::Warn,
            "compaction.reject",
            "{} major={} files={} dropped before execution",
            self.region,
            self.is_major,
            self.selection.len(),
        );
        self.store.finish_request(self);
        tracker.post_request(self);
    }

    fn mark_running(&self) {
        let _ = self.state.compare_exchange(
            RequestState::Pending as u8,
            RequestState::Running as u8,
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
        );
    }

    /// Move to a terminal state; returns whether this call was the one that
    /// made the transition.
    fn set_terminal(&self, terminal: RequestState) -> bool {
        self.state
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |raw| {
                if RequestState::from_raw(raw).is_terminal() {
                    None
                } else {
                    Some(terminal as u8)
                }
            })
            .is_ok()
    }
}

/// Unconditional release of the resources a running request holds: the
/// store's scheduling slot and the tracker's in-flight count.
struct SlotRelease<'a> {
    request: &'a CompactionRequest,
    tracker: &'a CompactionTracker,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        self.request.store.finish_request(self.request);
        self.tracker.post_request(self.request);
    }
}

impl PartialEq for CompactionRequest {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for CompactionRequest {}

impl PartialOrd for CompactionRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompactionRequest {
    /// Scheduling order: priority ascending, then creation time, then the
    /// creation sequence. Distinct requests never compare equal.
    fn cmp(&self, other: &Self) -> Ordering {
        if self.seq == other.seq {
            return Ordering::Equal;
        }
        self.priority()
            .cmp(&other.priority())
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl fmt::Debug for CompactionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactionRequest")
            .field("region", &self.region)
            .field("files", &self.selection.len())
            .field("total_size", &self.total_size)
            .field("is_major", &self.is_major)
            .field("priority", &self.priority())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cmp::Reverse,
        collections::BinaryHeap,
        sync::atomic::{AtomicBool, AtomicUsize},
    };

    use super::*;

    #[derive(Default)]
    struct NullStore {
        finishes: AtomicUsize,
    }

    impl Store for NullStore {
        fn region_id(&self) -> RegionId {
            RegionId::new(1)
        }

        fn compact(&self, _request: &CompactionRequest) -> Result<bool, CompactionError> {
            Ok(true)
        }

        fn compact_priority(&self) -> i32 {
            100
        }

        fn finish_request(&self, _request: &CompactionRequest) {
            self.finishes.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    #[derive(Default)]
    struct NullHost {
        stopped: AtomicBool,
    }

    impl RegionHost for NullHost {
        fn is_stopped(&self) -> bool {
            self.stopped.load(AtomicOrdering::SeqCst)
        }

        fn check_file_system(&self) {}

        fn request_compaction(&self, _region: RegionId, _store: Arc<dyn Store>, _reason: &str) {}

        fn request_split(&self, _region: RegionId) {}
    }

    fn request(priority: i32) -> Arc<CompactionRequest> {
        let req = CompactionRequest::new(
            Arc::new(NullStore::default()),
            Arc::new(NullHost::default()),
            vec![StoreFileHandle::new(1, 10), StoreFileHandle::new(2, 32)],
            false,
        )
        .expect("non-empty selection");
        req.set_priority(priority);
        Arc::new(req)
    }

    #[test]
    fn empty_selection_fails_fast() {
        let err = CompactionRequest::new(
            Arc::new(NullStore::default()),
            Arc::new(NullHost::default()),
            Vec::new(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, CompactionError::EmptySelection));
    }

    #[test]
    fn total_size_is_the_selection_sum() {
        let req = request(USER_PRIORITY);
        assert_eq!(req.total_size(), 42);
        assert_eq!(req.selection().len(), 2);
        assert!(!req.is_major());
    }

    #[test]
    fn min_heap_serves_priority_then_age() {
        // R1(priority=5, created first), R2(3), R3(3): expect R2, R3, R1
        // — R2 and R3 share a priority, so creation order decides.
        let r1 = request(5);
        let r2 = request(3);
        let r3 = request(3);

        let mut heap = BinaryHeap::new();
        for req in [&r1, &r3, &r2] {
            heap.push(Reverse(Arc::clone(req)));
        }
        // created_at ties within one instant resolution fall back to the
        // creation sequence, which matches construction order here.
        let popped: Vec<_> = std::iter::from_fn(|| heap.pop().map(|Reverse(r)| r)).collect();
        assert!(Arc::ptr_eq(&popped[0], &r2));
        assert!(Arc::ptr_eq(&popped[1], &r3));
        assert!(Arc::ptr_eq(&popped[2], &r1));
    }

    #[test]
    fn comparison_is_reflexive_and_strict() {
        let a = request(1);
        let b = request(1);
        assert_eq!(a.cmp(&a), Ordering::Equal);
        // Same priority, distinct requests: never equal.
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn priority_is_frozen_once_running() {
        let req = request(7);
        assert_eq!(req.priority(), 7);
        req.mark_running();
        assert!(!req.set_priority(1));
        assert_eq!(req.priority(), 7);
    }

    #[test]
    fn terminal_state_is_set_exactly_once() {
        let req = request(1);
        assert!(req.set_terminal(RequestState::Completed));
        assert!(!req.set_terminal(RequestState::Rejected));
        assert_eq!(req.state(), RequestState::Completed);
    }

    #[test]
    fn run_on_stopped_host_aborts_but_releases() {
        let store = Arc::new(NullStore::default());
        let host = Arc::new(NullHost::default());
        host.stopped.store(true, AtomicOrdering::SeqCst);
        let req = CompactionRequest::new(
            Arc::clone(&store) as Arc<dyn Store>,
            host,
            vec![StoreFileHandle::new(1, 1)],
            false,
        )
        .expect("valid request");

        let tracker = CompactionTracker::new();
        tracker.pre_request(&req);
        assert_eq!(req.run(&tracker, 0), CompactionOutcome::Aborted);
        assert_eq!(store.finishes.load(AtomicOrdering::SeqCst), 1);
        assert!(!tracker.is_compacting(req.region()));
    }

    #[test]
    fn reject_releases_exactly_once() {
        let store = Arc::new(NullStore::default());
        let req = CompactionRequest::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(NullHost::default()),
            vec![StoreFileHandle::new(1, 1)],
            true,
        )
        .expect("valid request");

        let tracker = CompactionTracker::new();
        tracker.pre_request(&req);
        req.reject(&tracker);
        req.reject(&tracker);
        assert_eq!(req.state(), RequestState::Rejected);
        assert_eq!(store.finishes.load(AtomicOrdering::SeqCst), 1);
        assert!(!tracker.is_compacting(req.region()));
    }
}
