//! Worker configuration handed down by the supervisor at spawn time.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a single worker process.
///
/// The supervisor owns the canonical copy; the worker receives an immutable
/// snapshot at spawn time and never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of completed requests after which the worker restarts itself
    /// gracefully. 0 means no restart budget (serve forever).
    pub max_requests: u64,
    /// HTTP keep-alive grace. A zero duration disables keep-alive, so every
    /// connection is closed after one response.
    pub keepalive: Duration,
    /// Cadence of the heartbeat and watchdog checks.
    pub heartbeat_interval: Duration,
    /// Optional TLS configuration. `None` serves plain HTTP.
    pub tls: Option<TlsConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_requests: 0,
            keepalive: Duration::from_secs(2),
            heartbeat_interval: Duration::from_millis(1000),
            tls: None,
        }
    }
}

impl WorkerConfig {
    /// Whether keep-alive connections are allowed at all.
    #[must_use]
    pub fn keepalive_enabled(&self) -> bool {
        !self.keepalive.is_zero()
    }
}

/// TLS certificate configuration.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain.
    pub cert_path: PathBuf,
    /// Path to the PEM private key.
    pub key_path: PathBuf,
}
