//! Attaches the embedded HTTP server to supervisor-provided sockets.
//!
//! The worker never binds listening sockets itself: the supervisor opens
//! them before spawning and hands them over for the worker's lifetime. This
//! module flips each socket to non-blocking mode, applies the keep-alive
//! policy from configuration, builds the TLS context once when configured,
//! and starts one server per socket, all of them steered by a single
//! [`axum_server::Handle`] registered with the drain controller.

use std::net::TcpListener;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::task::JoinSet;
use tracing::info;

use drover_core::WorkerConfig;

use crate::drain::DrainController;
use crate::error::WorkerError;

/// Starts serving on every supervisor-provided socket.
///
/// Returns the set of server tasks. Each task runs until the drain
/// controller's phase-1 stop asks its server to shut down gracefully.
///
/// # Errors
///
/// Returns an error if a socket cannot be switched to non-blocking mode or
/// the TLS material cannot be loaded. Errors after startup do not surface
/// here; they terminate the affected server task.
pub async fn start(
    sockets: Vec<TcpListener>,
    router: Router,
    config: &WorkerConfig,
    drain: &DrainController,
) -> Result<JoinSet<std::io::Result<()>>, WorkerError> {
    let handle = axum_server::Handle::new();
    drain.register_server(handle.clone());

    let keepalive_enabled = config.keepalive_enabled();

    // Built once per worker; immutable afterwards.
    let tls = match &config.tls {
        Some(tls) => Some(
            RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .map_err(WorkerError::Tls)?,
        ),
        None => None,
    };

    let mut servers = JoinSet::new();
    for socket in sockets {
        socket.set_nonblocking(true).map_err(WorkerError::Socket)?;
        let local_addr = socket.local_addr().map_err(WorkerError::Socket)?;

        let router = router.clone();
        let handle = handle.clone();

        match tls.clone() {
            Some(rustls) => {
                info!(%local_addr, "serving TLS connections");
                servers.spawn(async move {
                    let mut server = axum_server::from_tcp_rustls(socket, rustls).handle(handle);
                    server.http_builder().http1().keep_alive(keepalive_enabled);
                    server.serve(router.into_make_service()).await
                });
            }
            None => {
                info!(%local_addr, "serving plain HTTP connections");
                servers.spawn(async move {
                    let mut server = axum_server::from_tcp(socket).handle(handle);
                    server.http_builder().http1().keep_alive(keepalive_enabled);
                    server.serve(router.into_make_service()).await
                });
            }
        }
    }

    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_router() -> Router {
        Router::new().route("/", axum::routing::get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn start_spawns_one_server_per_socket() {
        let sockets = vec![
            TcpListener::bind("127.0.0.1:0").expect("bind"),
            TcpListener::bind("127.0.0.1:0").expect("bind"),
        ];
        let drain = DrainController::new();

        let servers = start(sockets, test_router(), &WorkerConfig::default(), &drain)
            .await
            .expect("start");

        assert_eq!(servers.len(), 2);
    }

    #[tokio::test]
    async fn graceful_stop_ends_all_server_tasks() {
        let sockets = vec![TcpListener::bind("127.0.0.1:0").expect("bind")];
        let drain = DrainController::new();

        let mut servers = start(sockets, test_router(), &WorkerConfig::default(), &drain)
            .await
            .expect("start");

        // Let the server tasks reach their accept loops before stopping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drain.stop_server();

        let joined = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(result) = servers.join_next().await {
                result.expect("task not cancelled").expect("server io");
            }
        })
        .await;

        assert!(joined.is_ok(), "servers must stop after a graceful stop");
    }

    #[tokio::test]
    async fn missing_tls_material_fails_startup() {
        let sockets = vec![TcpListener::bind("127.0.0.1:0").expect("bind")];
        let drain = DrainController::new();

        let config = WorkerConfig {
            tls: Some(drover_core::TlsConfig {
                cert_path: "/nonexistent/cert.pem".into(),
                key_path: "/nonexistent/key.pem".into(),
            }),
            ..WorkerConfig::default()
        };

        let result = start(sockets, test_router(), &config, &drain).await;
        assert!(matches!(result, Err(WorkerError::Tls(_))));
    }
}
