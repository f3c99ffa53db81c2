//! The application served by a worker.
//!
//! A worker hosts either a native event-loop application (an [`axum::Router`])
//! or a synchronous request/response handler that must never run on the event
//! loop. The choice is made by interface conformance -- callers construct the
//! variant matching what they have -- and the synchronous variant is wrapped
//! in an adapter that runs every call on the blocking pool.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use http::StatusCode;
use tracing::warn;

use crate::observe::header_pairs;

/// A synchronous request as seen by a blocking handler.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Request method (e.g. `"GET"`).
    pub method: String,
    /// URI path.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request headers as (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Fully collected request body.
    pub body: Bytes,
}

/// A synchronous response produced by a blocking handler.
#[derive(Debug, Clone)]
pub struct SyncResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers as (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl SyncResponse {
    /// Convenience constructor for a 200 response with a body.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

/// A synchronous request/response callable.
///
/// Handlers may block; the adapter keeps them off the event loop.
pub trait SyncApp: Send + Sync + 'static {
    /// Handles one request, blocking as needed.
    fn call(&self, request: SyncRequest) -> SyncResponse;
}

/// The application a worker serves.
pub enum Application {
    /// Already an event-loop application; used as-is.
    Native(Router),
    /// A synchronous callable; wrapped in the blocking adapter.
    Blocking(Arc<dyn SyncApp>),
}

impl From<Router> for Application {
    fn from(router: Router) -> Self {
        Self::Native(router)
    }
}

impl Application {
    /// Wraps a synchronous handler.
    #[must_use]
    pub fn blocking(app: Arc<dyn SyncApp>) -> Self {
        Self::Blocking(app)
    }

    /// Resolves the application into the router the server will mount.
    #[must_use]
    pub fn into_router(self) -> Router {
        match self {
            Self::Native(router) => router,
            Self::Blocking(app) => blocking_router(app),
        }
    }
}

/// Builds a router that forwards every request to a blocking handler.
fn blocking_router(app: Arc<dyn SyncApp>) -> Router {
    Router::new().fallback(move |request: Request| {
        let app = Arc::clone(&app);
        async move { dispatch_blocking(app, request).await }
    })
}

/// Collects the request, runs the handler on the blocking pool, and rebuilds
/// the response.
async fn dispatch_blocking(app: Arc<dyn SyncApp>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to read request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let sync_request = SyncRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(ToString::to_string),
        headers: header_pairs(&parts.headers),
        body,
    };

    let handled = tokio::task::spawn_blocking(move || app.call(sync_request)).await;

    match handled {
        Ok(sync_response) => build_response(sync_response),
        Err(err) => {
            warn!(error = %err, "blocking handler panicked or was cancelled");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Rebuilds an axum response from the handler's synchronous response.
fn build_response(sync_response: SyncResponse) -> Response {
    let status = StatusCode::from_u16(sync_response.status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut builder = Response::builder().status(status);
    for (name, value) in sync_response.headers {
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(sync_response.body))
        .unwrap_or_else(|err| {
            warn!(error = %err, "handler produced an unbuildable response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
