//! Process-wide accounting of in-flight compactions per region.
//!
//! The tracker answers "is this region compacting right now" and lets the
//! maintenance policy bound duplicate scheduling. It is an explicitly
//! constructed, injected object; whoever schedules and runs requests shares
//! one instance by reference.

use std::{fmt, sync::atomic::AtomicI64, sync::atomic::Ordering};

use crossbeam_skiplist::SkipMap;

use super::CompactionRequest;
use crate::store::RegionId;

/// Which flavours of compaction a region currently has in flight, combined
/// as a two-bit flag: minor is bit 0, major is bit 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompactionState {
    /// Nothing in flight.
    #[default]
    None,
    /// At least one minor compaction running.
    Minor,
    /// At least one major compaction running.
    Major,
    /// Both flavours running concurrently.
    MajorAndMinor,
}

impl CompactionState {
    fn from_flags(major: bool, minor: bool) -> Self {
        match (major, minor) {
            (false, false) => Self::None,
            (false, true) => Self::Minor,
            (true, false) => Self::Major,
            (true, true) => Self::MajorAndMinor,
        }
    }
}

impl fmt::Display for CompactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::MajorAndMinor => "major+minor",
        };
        f.write_str(name)
    }
}

/// Counters of running major and minor compactions keyed by region.
///
/// Entries are created on first use and persist at zero afterwards; there is
/// no teardown. Every mutation is one atomic increment or decrement, so the
/// tracker is safe under unbounded concurrent use without broader locking.
#[derive(Debug, Default)]
pub struct CompactionTracker {
    major: SkipMap<i64, AtomicI64>,
    minor: SkipMap<i64, AtomicI64>,
}

impl CompactionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request` as in flight. Called right before the request is
    /// handed to the executor; must be paired with exactly one
    /// [`CompactionTracker::post_request`].
    pub fn pre_request(&self, request: &CompactionRequest) {
        self.counters(request.is_major())
            .get_or_insert_with(request.region().get(), || AtomicI64::new(0))
            .value()
            .fetch_add(1, Ordering::AcqRel);
    }

    /// Deregister `request` on a terminal path. Never creates an entry; an
    /// unpaired call is a usage error the tracker does not correct (the
    /// counter goes observably negative rather than being floored).
    pub fn post_request(&self, request: &CompactionRequest) {
        if let Some(entry) = self.counters(request.is_major()).get(&request.region().get()) {
            entry.value().fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Current in-flight flavours for `region`.
    pub fn compaction_state(&self, region: RegionId) -> CompactionState {
        CompactionState::from_flags(
            self.count(&self.major, region) > 0,
            self.count(&self.minor, region) > 0,
        )
    }

    /// Whether any compaction is in flight for `region`.
    pub fn is_compacting(&self, region: RegionId) -> bool {
        self.compaction_state(region) != CompactionState::None
    }

    fn counters(&self, is_major: bool) -> &SkipMap<i64, AtomicI64> {
        if is_major {
            &self.major
        } else {
            &self.minor
        }
    }

    fn count(&self, counters: &SkipMap<i64, AtomicI64>, region: RegionId) -> i64 {
        counters
            .get(&region.get())
            .map_or(0, |entry| entry.value().load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
        Arc,
    };

    use super::{super::CompactionError, *};
    use crate::store::{RegionHost, Store, StoreFileHandle};

    struct FixedStore(RegionId);

    impl Store for FixedStore {
        fn region_id(&self) -> RegionId {
            self.0
        }

        fn compact(&self, _request: &CompactionRequest) -> Result<bool, CompactionError> {
            Ok(true)
        }

        fn compact_priority(&self) -> i32 {
            100
        }

        fn finish_request(&self, _request: &CompactionRequest) {}
    }

    struct IdleHost;

    impl RegionHost for IdleHost {
        fn is_stopped(&self) -> bool {
            false
        }

        fn check_file_system(&self) {}

        fn request_compaction(&self, _region: RegionId, _store: Arc<dyn Store>, _reason: &str) {}

        fn request_split(&self, _region: RegionId) {}
    }

    fn request(region: RegionId, is_major: bool) -> CompactionRequest {
        CompactionRequest::new(
            Arc::new(FixedStore(region)),
            Arc::new(IdleHost),
            vec![StoreFileHandle::new(1, 1)],
            is_major,
        )
        .expect("valid request")
    }

    #[test]
    fn major_registration_reports_major_then_none() {
        let tracker = CompactionTracker::new();
        let region = RegionId::new(42);
        let req = request(region, true);

        assert_eq!(tracker.compaction_state(region), CompactionState::None);
        tracker.pre_request(&req);
        assert_eq!(tracker.compaction_state(region), CompactionState::Major);
        tracker.post_request(&req);
        assert_eq!(tracker.compaction_state(region), CompactionState::None);
    }

    #[test]
    fn flavours_combine_per_region() {
        let tracker = CompactionTracker::new();
        let region = RegionId::new(7);
        let major = request(region, true);
        let minor = request(region, false);

        tracker.pre_request(&minor);
        assert_eq!(tracker.compaction_state(region), CompactionState::Minor);
        tracker.pre_request(&major);
        assert_eq!(
            tracker.compaction_state(region),
            CompactionState::MajorAndMinor
        );
        tracker.post_request(&minor);
        assert_eq!(tracker.compaction_state(region), CompactionState::Major);

        // Other regions are unaffected.
        assert_eq!(tracker.compaction_state(RegionId::new(8)), CompactionState::None);
    }

    #[test]
    fn unpaired_post_request_never_creates_an_entry() {
        let tracker = CompactionTracker::new();
        let req = request(RegionId::new(1), false);
        tracker.post_request(&req);
        assert_eq!(tracker.compaction_state(RegionId::new(1)), CompactionState::None);
    }

    #[test]
    fn concurrent_registration_balances_out() {
        let tracker = Arc::new(CompactionTracker::new());
        let region = RegionId::new(3);
        let peak_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let peak_seen = Arc::clone(&peak_seen);
                std::thread::spawn(move || {
                    let req = request(region, false);
                    for _ in 0..500 {
                        tracker.pre_request(&req);
                        if tracker.is_compacting(region) {
                            peak_seen.fetch_add(1, AtomicOrdering::Relaxed);
                        }
                        tracker.post_request(&req);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker finished");
        }

        assert_eq!(tracker.compaction_state(region), CompactionState::None);
        // Every thread observed its own registration.
        assert!(peak_seen.load(AtomicOrdering::Relaxed) >= 500 * 8);
    }

    #[test]
    fn state_displays_compactly() {
        assert_eq!(CompactionState::None.to_string(), "none");
        assert_eq!(CompactionState::MajorAndMinor.to_string(), "major+minor");
    }
}
