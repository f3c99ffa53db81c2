//! Shared worker state: liveness, server phase, and the request budget.
//!
//! All mutation happens through atomics so timer ticks and the request
//! observation middleware can share the state without locks. The `alive`
//! flag is one-way: once it drops to `false` the worker is committed to
//! draining and nothing may flip it back.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Per-process worker state.
#[derive(Debug)]
pub struct WorkerState {
    /// `true` while the worker accepts new work. One-way transition to `false`.
    alive: AtomicBool,
    /// `true` while the embedded server exists and has not been told to stop.
    server_alive: AtomicBool,
    /// Number of completed requests.
    requests: AtomicU64,
    /// Completed-request budget. 0 means unlimited.
    max_requests: u64,
    /// Parent process id recorded at spawn time.
    expected_parent: u32,
}

impl WorkerState {
    /// Creates the state for a freshly initialized worker: alive, server not
    /// yet started, zero requests served.
    #[must_use]
    pub fn new(max_requests: u64, expected_parent: u32) -> Self {
        Self {
            alive: AtomicBool::new(true),
            server_alive: AtomicBool::new(false),
            requests: AtomicU64::new(0),
            max_requests,
            expected_parent,
        }
    }

    /// Whether the worker still accepts new work.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Commits the worker to draining.
    ///
    /// Returns `true` only for the call that actually made the transition,
    /// so callers can log the cause exactly once. Subsequent calls are
    /// no-ops: `alive` never goes back to `true`.
    pub fn begin_shutdown(&self) -> bool {
        self.alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the embedded server is running and has not been told to stop.
    #[must_use]
    pub fn server_alive(&self) -> bool {
        self.server_alive.load(Ordering::Acquire)
    }

    /// Marks the embedded server as started and accepting connections.
    pub fn set_server_started(&self) {
        self.server_alive.store(true, Ordering::Release);
    }

    /// Marks the embedded server as told to stop.
    pub fn set_server_stopped(&self) {
        self.server_alive.store(false, Ordering::Release);
    }

    /// Number of requests completed so far.
    #[must_use]
    pub fn completed_requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Parent process id recorded at spawn time.
    #[must_use]
    pub fn expected_parent(&self) -> u32 {
        self.expected_parent
    }

    /// Records one completed request.
    ///
    /// Returns `true` when this completion exhausted the request budget and
    /// armed the graceful restart -- that happens at most once per process.
    /// Nothing is stopped here; the heartbeat consumes the `alive` flag.
    pub fn record_completion(&self) -> bool {
        let completed = self.requests.fetch_add(1, Ordering::AcqRel) + 1;
        if self.max_requests == 0 || completed < self.max_requests {
            return false;
        }
        self.begin_shutdown()
    }
}
