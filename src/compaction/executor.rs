//! Bounded worker pool draining compaction requests in priority order.
//!
//! Producers submit requests from wherever the maintenance policy runs;
//! `pool_size` worker threads pop the minimum of the request order (lowest
//! priority number, then oldest) and run each request to completion,
//! blocking for the full merge. Admission is bounded: once
//! `queue_capacity` requests are pending, further submissions take the
//! rejection path, which releases the request's resources instead of
//! leaking its slot.

use std::{
    cmp::{Ordering as CmpOrdering, Reverse},
    collections::BinaryHeap,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread,
};

use log::Level;

use super::{CompactionError, CompactionRequest, CompactionTracker};
use crate::{logging::store_log, option::ExecutorOption};

/// Heap entry delegating to the request's scheduling order.
struct QueuedRequest(Arc<CompactionRequest>);

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.cmp(&other.0)
    }
}

struct Queue {
    heap: BinaryHeap<Reverse<QueuedRequest>>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    work_ready: Condvar,
    tracker: Arc<CompactionTracker>,
    opt: ExecutorOption,
}

impl Shared {
    /// A poisoned lock only means a worker panicked mid-merge; the queue
    /// itself is a plain heap and stays usable.
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The worker pool. Dropping it shuts it down: the backlog is rejected and
/// workers are joined once their current merge finishes.
pub struct CompactionExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl CompactionExecutor {
    /// Spawn the worker pool.
    pub fn new(
        opt: ExecutorOption,
        tracker: Arc<CompactionTracker>,
    ) -> Result<Self, CompactionError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                heap: BinaryHeap::new(),
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            tracker,
            opt,
        });

        let mut workers = Vec::with_capacity(shared.opt.pool_size);
        for index in 0..shared.opt.pool_size {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("compaction-{index}"))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Register `request` with the tracker and queue it for execution.
    ///
    /// When the queue is at capacity (or the executor is shutting down) the
    /// request is rejected instead: its store slot and tracker count are
    /// released exactly as a completed run would release them, and the
    /// caller gets [`CompactionError::Saturated`] (or
    /// [`CompactionError::Shutdown`]). Re-submission is the caller's
    /// choice; no backoff happens here.
    pub fn submit(&self, request: Arc<CompactionRequest>) -> Result<(), CompactionError> {
        self.shared.tracker.pre_request(&request);

        let mut queue = self.shared.lock_queue();
        if queue.shutdown {
            drop(queue);
            request.reject(&self.shared.tracker);
            return Err(CompactionError::Shutdown);
        }
        if queue.heap.len() >= self.shared.opt.queue_capacity {
            drop(queue);
            store_log!(
                Level::Warn,
                "compaction.saturated",
                "{} queue at capacity {}",
                request.region(),
                self.shared.opt.queue_capacity,
            );
            request.reject(&self.shared.tracker);
            return Err(CompactionError::Saturated {
                capacity: self.shared.opt.queue_capacity,
            });
        }

        queue.heap.push(Reverse(QueuedRequest(request)));
        drop(queue);
        self.shared.work_ready.notify_one();
        Ok(())
    }

    /// Tracker shared with submitters; answers "is this region compacting".
    pub fn tracker(&self) -> &Arc<CompactionTracker> {
        &self.shared.tracker
    }

    /// Number of requests admitted but not yet picked up.
    pub fn pending(&self) -> usize {
        self.shared.lock_queue().heap.len()
    }

    /// Stop admitting work, reject the backlog, and join the workers.
    ///
    /// Requests already running finish naturally; queued ones take the
    /// rejection path so no slot leaks. Idempotent.
    pub fn shutdown(&self) {
        let backlog = {
            let mut queue = self.shared.lock_queue();
            queue.shutdown = true;
            std::mem::take(&mut queue.heap)
        };
        self.shared.work_ready.notify_all();
        for Reverse(QueuedRequest(request)) in backlog {
            request.reject(&self.shared.tracker);
        }

        let handles = {
            let mut workers = match self.workers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for CompactionExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let request = {
            let mut queue = shared.lock_queue();
            loop {
                if let Some(Reverse(QueuedRequest(request))) = queue.heap.pop() {
                    break request;
                }
                if queue.shutdown {
                    return;
                }
                queue = match shared.work_ready.wait(queue) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };
        let _ = request.run(&shared.tracker, shared.opt.recompaction_floor);
    }
}
