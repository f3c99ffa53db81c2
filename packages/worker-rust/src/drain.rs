//! Two-phase drain control for the worker's embedded server and event loop.
//!
//! Phase 1 asks the embedded server to stop accepting and finish in-flight
//! connections. Phase 2 stops the event loop once nothing is in flight.
//! Both phases are driven by the periodic heartbeat check, never directly
//! by the restart trigger, so the loop is never torn down while requests
//! might still schedule work.
//!
//! In-flight tracking uses an atomic counter with RAII guards held for the
//! full lifetime of each response body, so a request only stops counting
//! once its response has actually been sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

/// Coordinates the two-phase shutdown of one worker process.
pub struct DrainController {
    loop_stop: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    server: OnceLock<axum_server::Handle>,
}

impl DrainController {
    /// Creates a controller with no server registered and nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            loop_stop: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            server: OnceLock::new(),
        }
    }

    /// Registers the handle of the running embedded server.
    ///
    /// The first registration wins; a worker owns exactly one server.
    pub fn register_server(&self, handle: axum_server::Handle) {
        let _ = self.server.set(handle);
    }

    /// Phase 1: asks the embedded server to stop accepting connections and
    /// drain the ones in flight.
    ///
    /// Best-effort: if no server was registered there is nothing to stop and
    /// the call is a no-op.
    pub fn stop_server(&self) {
        if let Some(handle) = self.server.get() {
            handle.graceful_shutdown(None);
        }
    }

    /// Creates an RAII guard that tracks an in-flight request.
    ///
    /// The counter is incremented on creation and decremented when the guard
    /// is dropped, even if the handler panics.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Current number of in-flight requests.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Whether no scheduled request work remains.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_flight_count() == 0
    }

    /// Phase 2: stops the event loop, returning control to the worker's
    /// `run()`.
    pub fn stop_loop(&self) {
        // Ignore send errors -- receivers may have been dropped.
        let _ = self.loop_stop.send(true);
    }

    /// Returns a receiver notified when the event loop must stop.
    #[must_use]
    pub fn loop_stop_receiver(&self) -> watch::Receiver<bool> {
        self.loop_stop.subscribe()
    }
}

impl Default for DrainController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
