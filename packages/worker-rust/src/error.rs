//! Worker error types.

use thiserror::Error;

/// Errors that can abort a worker before or during startup.
///
/// Failures after the server is accepting connections do not surface here;
/// they are logged and funneled into the graceful drain path instead.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// An event loop from before the process boundary is still reachable on
    /// this thread. The worker must own a fresh loop, never an inherited one.
    #[error("an event loop inherited across the process boundary is still active")]
    InheritedRuntime,

    /// Supervisor-level base initialization failed. Fatal: the process exits
    /// without leaving partial worker state running.
    #[error("supervisor base initialization failed")]
    Init(#[source] anyhow::Error),

    /// The worker's own event loop could not be constructed.
    #[error("failed to build the worker event loop")]
    Runtime(#[source] std::io::Error),

    /// A supervisor-provided listening socket could not be prepared.
    #[error("failed to prepare listening socket")]
    Socket(#[source] std::io::Error),

    /// The TLS certificate or key could not be loaded.
    #[error("failed to load TLS certificates")]
    Tls(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_human_readable_messages() {
        let err = WorkerError::InheritedRuntime;
        assert!(err.to_string().contains("inherited"));

        let err = WorkerError::Init(anyhow::anyhow!("tmp dir missing"));
        assert!(err.to_string().contains("base initialization"));
    }

    #[test]
    fn init_error_preserves_source() {
        use std::error::Error as _;

        let err = WorkerError::Init(anyhow::anyhow!("tmp dir missing"));
        let source = err.source().expect("source attached");
        assert!(source.to_string().contains("tmp dir missing"));
    }
}
