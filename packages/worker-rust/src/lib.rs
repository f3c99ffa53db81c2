//! Drover Worker: a supervised event-loop HTTP worker process.
//!
//! The supervisor spawns one process per worker and hands it pre-opened
//! listening sockets plus a [`drover_core::SupervisorLink`]. The worker
//! owns a private event loop and an embedded HTTP server, reports liveness
//! on a fixed cadence, restarts itself gracefully once its request budget
//! is spent, and drains out when it discovers it has been orphaned.

pub mod app;
pub mod drain;
pub mod error;
pub mod heartbeat;
pub mod middleware;
pub mod observe;
pub mod server;
pub mod state;
pub mod worker;

pub use app::{Application, SyncApp, SyncRequest, SyncResponse};
pub use drain::{DrainController, InFlightGuard};
pub use error::WorkerError;
pub use heartbeat::{Heartbeat, OsParentProbe, ParentProbe, Watchdog};
pub use observe::SERVER_IDENT;
pub use state::WorkerState;
pub use worker::{handle_exit, EventLoopWorker, ExitAction, ExitReason};
