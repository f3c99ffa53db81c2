//! Standalone worker for manual testing.
//!
//! Binds its own socket (normally the supervisor's job), serves a trivial
//! application, and runs the full worker lifecycle: heartbeats, request
//! budget, graceful drain. Useful for poking at drain behavior with curl.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use drover_core::{StandaloneLink, TlsConfig, WorkerConfig};
use drover_worker::{Application, EventLoopWorker};

#[derive(Debug, Parser)]
#[command(name = "test-worker", about = "Run a single drover worker standalone")]
struct Args {
    /// Bind address.
    #[arg(long, env = "DROVER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on. 0 means OS-assigned.
    #[arg(long, env = "DROVER_PORT", default_value_t = 0)]
    port: u16,

    /// Request budget before graceful restart. 0 disables the budget.
    #[arg(long, env = "DROVER_MAX_REQUESTS", default_value_t = 0)]
    max_requests: u64,

    /// Keep-alive grace in seconds. 0 disables keep-alive.
    #[arg(long, env = "DROVER_KEEPALIVE_SECS", default_value_t = 2)]
    keepalive_secs: u64,

    /// Heartbeat/watchdog cadence in milliseconds.
    #[arg(long, env = "DROVER_HEARTBEAT_MS", default_value_t = 1000)]
    heartbeat_ms: u64,

    /// TLS certificate path. Requires --key.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// TLS private key path. Requires --cert.
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn demo_router() -> Router {
    Router::new()
        .route("/", get(|| async { "hello from drover\n" }))
        .route(
            "/delay",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(250)).await;
                "slow hello from drover\n"
            }),
        )
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let tls = match (args.cert, args.key) {
        (Some(cert_path), Some(key_path)) => Some(TlsConfig {
            cert_path,
            key_path,
        }),
        _ => None,
    };

    let config = WorkerConfig {
        max_requests: args.max_requests,
        keepalive: Duration::from_secs(args.keepalive_secs),
        heartbeat_interval: Duration::from_millis(args.heartbeat_ms),
        tls,
    };

    // Standalone only: a real deployment receives sockets from the
    // supervisor instead of binding here.
    let socket = TcpListener::bind((args.host.as_str(), args.port))
        .with_context(|| format!("binding {}:{}", args.host, args.port))?;
    info!(addr = %socket.local_addr()?, "socket bound");

    let worker = EventLoopWorker::new(
        config,
        vec![socket],
        Arc::new(StandaloneLink::new()),
        Application::from(demo_router()),
    );

    worker.init_process()?;
    let reason = worker.run()?;
    info!(?reason, "worker exited");
    Ok(())
}
