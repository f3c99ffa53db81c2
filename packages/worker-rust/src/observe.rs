//! Request observation middleware.
//!
//! Observes every completed request the embedded server handles, with three
//! jobs:
//!
//! 1. count completions against the worker's request budget,
//! 2. capture a real access-log record (status, headers, counted body
//!    bytes, elapsed time), and
//! 3. tag every outgoing response with the worker's server identity.
//!
//! The hook fires when the response *body* is finished, not when the handler
//! returns, so a request only counts once its response has actually been
//! sent. That is done by wrapping the response body in [`BodyTap`], which
//! counts data frames as they stream out and reports on drop -- exactly once
//! per request, in response-completion order, client aborts included. The
//! tap also holds the drain controller's in-flight guard, so the drain
//! sequence cannot stop the loop under a half-sent response.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use bytes::Bytes;
use http::header::SERVER;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body::{Frame, SizeHint};
use tower::{Layer, Service};
use tracing::info;

use drover_core::{AccessLog, AccessRecord};

use crate::drain::{DrainController, InFlightGuard};
use crate::state::WorkerState;

/// Identity token advertised in the `Server` response header.
pub const SERVER_IDENT: &str = concat!("drover/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// RequestObserver
// ---------------------------------------------------------------------------

/// Shared sink for completed-request reports.
pub struct RequestObserver {
    state: Arc<WorkerState>,
    drain: Arc<DrainController>,
    access_log: Arc<dyn AccessLog>,
}

impl RequestObserver {
    /// Creates an observer over the worker's shared state.
    #[must_use]
    pub fn new(
        state: Arc<WorkerState>,
        drain: Arc<DrainController>,
        access_log: Arc<dyn AccessLog>,
    ) -> Self {
        Self {
            state,
            drain,
            access_log,
        }
    }

    /// Reports one completed request.
    fn on_complete(&self, record: AccessRecord) {
        self.access_log.access(&record);
        if self.state.record_completion() {
            info!(
                completed = self.state.completed_requests(),
                "request budget reached, restarting worker after in-flight requests complete"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// ObserveLayer / ObserveService
// ---------------------------------------------------------------------------

/// Tower layer installing the request observation middleware.
#[derive(Clone)]
pub struct ObserveLayer {
    observer: Arc<RequestObserver>,
}

impl ObserveLayer {
    /// Creates the layer around a shared observer.
    #[must_use]
    pub fn new(observer: Arc<RequestObserver>) -> Self {
        Self { observer }
    }
}

impl<S> Layer<S> for ObserveLayer {
    type Service = ObserveService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ObserveService {
            inner,
            observer: Arc::clone(&self.observer),
        }
    }
}

/// Service wrapper that captures request metadata on the way in and taps the
/// response body on the way out.
#[derive(Clone)]
pub struct ObserveService<S> {
    inner: S,
    observer: Arc<RequestObserver>,
}

impl<S> Service<Request<Body>> for ObserveService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let observer = Arc::clone(&self.observer);
        let guard = observer.drain.in_flight_guard();
        let start = Instant::now();
        let request_headers = header_pairs(request.headers());
        let environ = build_environ(&request);

        let fut = self.inner.call(request);

        Box::pin(async move {
            let response = fut.await?;
            let (mut parts, body) = response.into_parts();

            tag_server_header(&mut parts.headers);

            let hook = CompletionHook {
                observer,
                status: parts.status,
                headers: header_pairs(&parts.headers),
                request_headers,
                environ,
                start,
                _guard: guard,
            };

            let tapped = BodyTap::new(body, hook);
            Ok(Response::from_parts(parts, Body::new(tapped)))
        })
    }
}

// ---------------------------------------------------------------------------
// BodyTap
// ---------------------------------------------------------------------------

/// Everything needed to report a request once its response body is done.
struct CompletionHook {
    observer: Arc<RequestObserver>,
    status: StatusCode,
    headers: Vec<(String, String)>,
    request_headers: Vec<(String, String)>,
    environ: HashMap<String, String>,
    start: Instant,
    /// Held until the body is dropped so the drain controller keeps counting
    /// this request as in flight.
    _guard: InFlightGuard,
}

impl CompletionHook {
    fn fire(self, bytes_sent: u64) {
        let record = AccessRecord {
            status: self.status.as_u16().to_string(),
            headers: self.headers,
            bytes_sent,
            request_headers: self.request_headers,
            environ: self.environ,
            response_time: self.start.elapsed(),
        };
        self.observer.on_complete(record);
    }
}

/// Response body wrapper that counts sent bytes and reports completion.
///
/// The report fires on drop, which the server performs after streaming the
/// body to its end (or after the connection is lost), so "completed" means
/// the response is actually off the worker's hands.
struct BodyTap {
    inner: Body,
    sent: u64,
    hook: Option<CompletionHook>,
}

impl BodyTap {
    fn new(inner: Body, hook: CompletionHook) -> Self {
        Self {
            inner,
            sent: 0,
            hook: Some(hook),
        }
    }
}

impl http_body::Body for BodyTap {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.sent += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for BodyTap {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook.fire(self.sent);
        }
    }
}

// ---------------------------------------------------------------------------
// Capture helpers
// ---------------------------------------------------------------------------

/// Tags the `Server` response header with the worker identity.
///
/// An absent header is set outright; an existing one from the application is
/// kept and the identity appended, unless it already carries it.
pub fn tag_server_header(headers: &mut HeaderMap) {
    match headers.get(SERVER) {
        None => {
            headers.insert(SERVER, HeaderValue::from_static(SERVER_IDENT));
        }
        Some(existing) => {
            let existing = existing.to_str().unwrap_or_default();
            if existing.contains("drover/") {
                return;
            }
            let tagged = format!("{existing} ({SERVER_IDENT})");
            if let Ok(value) = HeaderValue::from_str(&tagged) {
                headers.insert(SERVER, value);
            }
        }
    }
}

/// Flattens a header map into (name, value) pairs in wire order.
///
/// Values that are not valid UTF-8 are captured as empty strings; the log
/// contract is string-typed.
pub(crate) fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

/// Builds the request environment map for the access log.
fn build_environ(request: &Request<Body>) -> HashMap<String, String> {
    HashMap::from([
        ("method".to_string(), request.method().to_string()),
        ("path".to_string(), request.uri().path().to_string()),
        (
            "query".to_string(),
            request.uri().query().unwrap_or_default().to_string(),
        ),
        ("protocol".to_string(), format!("{:?}", request.version())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[derive(Default)]
    struct CollectingLog {
        records: Mutex<Vec<AccessRecord>>,
    }

    impl AccessLog for CollectingLog {
        fn access(&self, record: &AccessRecord) {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    struct Fixture {
        state: Arc<WorkerState>,
        drain: Arc<DrainController>,
        log: Arc<CollectingLog>,
        router: Router,
    }

    fn fixture(max_requests: u64) -> Fixture {
        let state = Arc::new(WorkerState::new(max_requests, 1000));
        let drain = Arc::new(DrainController::new());
        let log = Arc::new(CollectingLog::default());

        let observer = Arc::new(RequestObserver::new(
            Arc::clone(&state),
            Arc::clone(&drain),
            Arc::clone(&log) as Arc<dyn AccessLog>,
        ));

        let router = Router::new()
            .route("/hello", get(|| async { "hello world" }))
            .layer(ObserveLayer::new(observer));

        Fixture {
            state,
            drain,
            log,
            router,
        }
    }

    async fn run_request(router: Router, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
        let request = Request::builder()
            .uri(uri)
            .header("host", "localhost")
            .body(Body::empty())
            .expect("request");

        let response = router.oneshot(request).await.expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        // Reading the body to its end drops the tap and fires the hook.
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, headers, body)
    }

    #[tokio::test]
    async fn completed_request_produces_a_real_record() {
        let fx = fixture(0);

        let (status, headers, body) = run_request(fx.router, "/hello?x=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"hello world");
        assert_eq!(
            headers.get(SERVER).and_then(|v| v.to_str().ok()),
            Some(SERVER_IDENT)
        );

        let records = fx.log.records.lock().unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.status, "200");
        assert_eq!(record.bytes_sent, 11, "counted body bytes, not a stub");
        assert_eq!(record.environ.get("method").unwrap(), "GET");
        assert_eq!(record.environ.get("path").unwrap(), "/hello");
        assert_eq!(record.environ.get("query").unwrap(), "x=1");
        assert!(
            record
                .request_headers
                .iter()
                .any(|(name, value)| name == "host" && value == "localhost"),
            "request headers are captured"
        );
        assert!(
            record
                .headers
                .iter()
                .any(|(name, _)| name == "server"),
            "response headers include the identity tag"
        );
    }

    #[tokio::test]
    async fn in_flight_guard_released_after_body_is_consumed() {
        let fx = fixture(0);
        let drain = Arc::clone(&fx.drain);

        let _ = run_request(fx.router, "/hello").await;

        assert!(drain.is_idle(), "guard must drop with the body");
    }

    #[tokio::test]
    async fn budget_trips_exactly_at_the_limit() {
        let fx = fixture(3);

        let _ = run_request(fx.router.clone(), "/hello").await;
        let _ = run_request(fx.router.clone(), "/hello").await;
        assert!(fx.state.is_alive(), "two of three served, still alive");

        let _ = run_request(fx.router, "/hello").await;
        assert!(!fx.state.is_alive(), "third completion arms the restart");
        assert_eq!(fx.log.records.lock().unwrap().len(), 3);
    }

    #[test]
    fn tag_sets_header_when_absent() {
        let mut headers = HeaderMap::new();
        tag_server_header(&mut headers);
        assert_eq!(
            headers.get(SERVER).and_then(|v| v.to_str().ok()),
            Some(SERVER_IDENT)
        );
    }

    #[test]
    fn tag_appends_to_application_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SERVER, HeaderValue::from_static("myapp"));

        tag_server_header(&mut headers);

        let value = headers.get(SERVER).and_then(|v| v.to_str().ok()).unwrap();
        assert_eq!(value, format!("myapp ({SERVER_IDENT})"));
    }

    #[test]
    fn tag_is_idempotent() {
        let mut headers = HeaderMap::new();
        tag_server_header(&mut headers);
        let once = headers.get(SERVER).cloned();

        tag_server_header(&mut headers);
        assert_eq!(headers.get(SERVER).cloned(), once);
    }
}
