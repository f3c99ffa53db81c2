//! Periodic heartbeat and watchdog checks.
//!
//! Two decoupled checks run at the same cadence on the worker's event loop.
//! The heartbeat reports liveness while the worker is healthy and drives the
//! two-phase drain once it is not. The watchdog re-reports liveness and
//! detects orphaning: if the OS-reported parent pid no longer matches the
//! pid recorded at spawn time, the supervisor is gone and the worker drains.
//!
//! Liveness reporting and orphan detection stay separate on purpose -- one
//! is a no-op ping, the other triggers shutdown, and a failure in one must
//! not suppress the other.
//!
//! Ticks are synchronous and O(1); anything slow here would stall every
//! connection in the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use drover_core::link::current_parent_pid;
use drover_core::SupervisorLink;

use crate::drain::DrainController;
use crate::state::WorkerState;

/// Source of the OS-reported parent process id.
///
/// A trait so the orphan condition can be exercised in tests without
/// actually reparenting the process.
pub trait ParentProbe: Send + Sync {
    /// Current parent pid of this process.
    fn parent_pid(&self) -> u32;
}

/// Probe backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsParentProbe;

impl ParentProbe for OsParentProbe {
    fn parent_pid(&self) -> u32 {
        current_parent_pid()
    }
}

/// Heartbeat check: liveness ping while alive, drain driver once not.
pub struct Heartbeat {
    state: Arc<WorkerState>,
    drain: Arc<DrainController>,
    link: Arc<dyn SupervisorLink>,
}

impl Heartbeat {
    /// Creates the heartbeat over the worker's shared state.
    #[must_use]
    pub fn new(
        state: Arc<WorkerState>,
        drain: Arc<DrainController>,
        link: Arc<dyn SupervisorLink>,
    ) -> Self {
        Self { state, drain, link }
    }

    /// Runs one heartbeat check.
    ///
    /// While alive: notify the supervisor. Once draining: first stop the
    /// server (phase 1), then stop the loop when nothing is in flight
    /// (phase 2). Each phase advances at most one step per tick.
    pub fn tick(&self) {
        if self.state.is_alive() {
            self.link.notify();
            return;
        }

        if self.state.server_alive() {
            self.drain.stop_server();
            self.state.set_server_stopped();
            return;
        }

        if self.drain.is_idle() {
            self.drain.stop_loop();
        }
    }

    /// Spawns the periodic heartbeat task on the current runtime.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(run_ticker(interval, move || self.tick()))
    }
}

/// Watchdog check: liveness re-notify plus orphan detection.
pub struct Watchdog {
    state: Arc<WorkerState>,
    link: Arc<dyn SupervisorLink>,
    probe: Arc<dyn ParentProbe>,
}

impl Watchdog {
    /// Creates the watchdog over the worker's shared state.
    #[must_use]
    pub fn new(
        state: Arc<WorkerState>,
        link: Arc<dyn SupervisorLink>,
        probe: Arc<dyn ParentProbe>,
    ) -> Self {
        Self { state, link, probe }
    }

    /// Runs one watchdog check.
    ///
    /// A parent-pid mismatch is not an error: it is a terminal condition
    /// funneled through the same graceful drain as budget exhaustion.
    pub fn tick(&self) {
        if self.state.is_alive() {
            self.link.notify();
        }

        let observed = self.probe.parent_pid();
        if observed != self.state.expected_parent() && self.state.begin_shutdown() {
            info!(
                expected = self.state.expected_parent(),
                observed, "parent changed, shutting down"
            );
        }
    }

    /// Spawns the periodic watchdog task on the current runtime.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(run_ticker(interval, move || self.tick()))
    }
}

/// Drives a synchronous tick at a fixed cadence.
///
/// Skips missed ticks instead of bursting so a stalled loop does not run a
/// backlog of checks at once.
async fn run_ticker(interval: Duration, tick: impl Fn()) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        tick();
    }
}
