//! The supervised event-loop worker.
//!
//! One worker owns one event loop, one embedded HTTP server attached to
//! supervisor-provided sockets, and the heartbeat/watchdog pair that keeps
//! it cooperatively governed: liveness notifications while healthy, a
//! graceful drain once the request budget is exhausted or the parent
//! disappears, and immediate termination on an exit signal only while still
//! accepting work.

use std::net::TcpListener;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use drover_core::{AccessLog, SupervisorLink, TracingAccessLog, WorkerConfig};

use crate::app::Application;
use crate::drain::DrainController;
use crate::error::WorkerError;
use crate::heartbeat::{Heartbeat, OsParentProbe, ParentProbe, Watchdog};
use crate::middleware::build_ambient_layers;
use crate::observe::{ObserveLayer, RequestObserver};
use crate::server;
use crate::state::WorkerState;

/// Why a worker's `run()` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The drain sequence completed: server stopped, in-flight work
    /// finished, loop stopped. Normal exit for budget exhaustion and
    /// orphaning.
    Drained,
    /// An exit signal arrived while the worker was still accepting work.
    Terminated,
}

/// What to do with an exit signal, decided by the worker's liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Default handling: terminate immediately.
    Terminate,
    /// Mid-drain: ignore the signal so the drain is not interrupted.
    Ignore,
}

/// Decides how an exit signal is handled.
///
/// While the worker is alive the default immediate handling applies. Once a
/// drain is in progress a duplicate termination signal is a no-op.
#[must_use]
pub fn handle_exit(state: &WorkerState) -> ExitAction {
    if state.is_alive() {
        ExitAction::Terminate
    } else {
        ExitAction::Ignore
    }
}

/// A single worker process serving an application under supervision.
pub struct EventLoopWorker {
    config: WorkerConfig,
    sockets: Vec<TcpListener>,
    link: Arc<dyn SupervisorLink>,
    app: Application,
    access_log: Arc<dyn AccessLog>,
    probe: Arc<dyn ParentProbe>,
}

impl EventLoopWorker {
    /// Creates a worker over supervisor-provided sockets.
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        sockets: Vec<TcpListener>,
        link: Arc<dyn SupervisorLink>,
        app: Application,
    ) -> Self {
        Self {
            config,
            sockets,
            link,
            app,
            access_log: Arc::new(TracingAccessLog),
            probe: Arc::new(OsParentProbe),
        }
    }

    /// Replaces the access-log sink.
    #[must_use]
    pub fn with_access_log(mut self, access_log: Arc<dyn AccessLog>) -> Self {
        self.access_log = access_log;
        self
    }

    /// Replaces the parent-pid probe. Intended for tests.
    #[must_use]
    pub fn with_parent_probe(mut self, probe: Arc<dyn ParentProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Process initialization, run once after spawn and before `run()`.
    ///
    /// No event-loop state may cross a process boundary: if a runtime
    /// inherited from before the spawn is still reachable on this thread,
    /// initialization refuses to proceed. Supervisor-level base
    /// initialization runs afterwards; its failure is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InheritedRuntime`] when called from inside an
    /// active runtime, or [`WorkerError::Init`] when base initialization
    /// fails.
    pub fn init_process(&self) -> Result<(), WorkerError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(WorkerError::InheritedRuntime);
        }
        self.link.init_process().map_err(WorkerError::Init)
    }

    /// Runs the worker to completion.
    ///
    /// Constructs a fresh, explicitly-owned current-thread event loop --
    /// never resolved through ambient lookup -- and blocks on it until the
    /// drain sequence stops it or an exit signal terminates it. This is the
    /// last call before normal process exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the event loop cannot be built or the server
    /// cannot attach to the provided sockets.
    pub fn run(self) -> Result<ExitReason, WorkerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(WorkerError::Runtime)?;

        let result = runtime.block_on(self.run_inner());

        // A handler stuck on the blocking pool must not hold the process
        // open past loop shutdown.
        runtime.shutdown_background();
        result
    }

    async fn run_inner(self) -> Result<ExitReason, WorkerError> {
        let state = Arc::new(WorkerState::new(
            self.config.max_requests,
            self.link.ppid(),
        ));
        let drain = Arc::new(DrainController::new());
        let mut loop_stop = drain.loop_stop_receiver();

        let heartbeat = Heartbeat::new(
            Arc::clone(&state),
            Arc::clone(&drain),
            Arc::clone(&self.link),
        )
        .spawn(self.config.heartbeat_interval);
        let watchdog = Watchdog::new(
            Arc::clone(&state),
            Arc::clone(&self.link),
            Arc::clone(&self.probe),
        )
        .spawn(self.config.heartbeat_interval);

        let observer = Arc::new(RequestObserver::new(
            Arc::clone(&state),
            Arc::clone(&drain),
            Arc::clone(&self.access_log),
        ));
        let router = self
            .app
            .into_router()
            .layer(ObserveLayer::new(observer))
            .layer(build_ambient_layers());

        let mut servers = server::start(self.sockets, router, &self.config, &drain).await?;
        state.set_server_started();
        info!(
            max_requests = self.config.max_requests,
            heartbeat_ms = u64::try_from(self.config.heartbeat_interval.as_millis())
                .unwrap_or(u64::MAX),
            "worker serving"
        );

        let (term_tx, mut term_rx) = watch::channel(false);
        let signals = spawn_exit_listener(Arc::clone(&state), term_tx);

        let reason = loop {
            tokio::select! {
                _ = loop_stop.changed() => {
                    info!(
                        completed = state.completed_requests(),
                        "drain complete, stopping event loop"
                    );
                    break ExitReason::Drained;
                }
                _ = term_rx.changed() => {
                    info!("terminating on exit signal");
                    break ExitReason::Terminated;
                }
                Some(joined) = servers.join_next() => {
                    match joined {
                        Ok(Ok(())) => debug!("server task finished"),
                        Ok(Err(err)) => {
                            error!(error = %err, "server failed, draining worker");
                            state.begin_shutdown();
                        }
                        Err(err) => {
                            error!(error = %err, "server task aborted, draining worker");
                            state.begin_shutdown();
                        }
                    }
                }
            }
        };

        // Timers are released before the loop itself shuts down.
        heartbeat.abort();
        watchdog.abort();
        signals.abort();
        servers.abort_all();

        Ok(reason)
    }
}

/// Listens for exit signals and applies [`handle_exit`] to each.
///
/// Stays armed for the worker's lifetime: a signal ignored mid-drain must
/// not unregister the listener.
#[cfg(unix)]
fn spawn_exit_listener(
    state: Arc<WorkerState>,
    term: watch::Sender<bool>,
) -> tokio::task::JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            error!("failed to install exit signal handlers");
            return;
        };

        loop {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            match handle_exit(&state) {
                ExitAction::Terminate => {
                    let _ = term.send(true);
                }
                ExitAction::Ignore => {
                    debug!("exit signal ignored during graceful drain");
                }
            }
        }
    })
}

#[cfg(not(unix))]
fn spawn_exit_listener(
    _state: Arc<WorkerState>,
    _term: watch::Sender<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(std::future::pending::<()>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::StandaloneLink;

    fn test_worker() -> EventLoopWorker {
        let socket = TcpListener::bind("127.0.0.1:0").expect("bind");
        EventLoopWorker::new(
            WorkerConfig::default(),
            vec![socket],
            Arc::new(StandaloneLink::new()),
            Application::from(axum::Router::new()),
        )
    }

    #[test]
    fn handle_exit_terminates_while_alive() {
        let state = WorkerState::new(0, 1000);
        assert_eq!(handle_exit(&state), ExitAction::Terminate);
    }

    #[test]
    fn handle_exit_is_a_noop_while_draining() {
        let state = WorkerState::new(0, 1000);
        state.begin_shutdown();
        assert_eq!(handle_exit(&state), ExitAction::Ignore);

        // Duplicate signals stay ignored.
        assert_eq!(handle_exit(&state), ExitAction::Ignore);
    }

    #[test]
    fn init_process_succeeds_outside_a_runtime() {
        let worker = test_worker();
        assert!(worker.init_process().is_ok());
    }

    #[tokio::test]
    async fn init_process_rejects_an_inherited_runtime() {
        let worker = test_worker();
        assert!(matches!(
            worker.init_process(),
            Err(WorkerError::InheritedRuntime)
        ));
    }

    #[test]
    fn init_process_propagates_base_init_failure() {
        struct FailingLink;
        impl SupervisorLink for FailingLink {
            fn init_process(&self) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("no tmp dir"))
            }
            fn notify(&self) {}
            fn ppid(&self) -> u32 {
                1000
            }
        }

        let socket = TcpListener::bind("127.0.0.1:0").expect("bind");
        let worker = EventLoopWorker::new(
            WorkerConfig::default(),
            vec![socket],
            Arc::new(FailingLink),
            Application::from(axum::Router::new()),
        );

        assert!(matches!(worker.init_process(), Err(WorkerError::Init(_))));
    }
}
