//! Ambient HTTP middleware for the worker.
//!
//! Builds the Tower middleware applied outside the request observation
//! layer. Ordering follows the outer-to-inner convention: the first layer
//! listed is the outermost (processes the request first on the way in, and
//! the response last on the way out).

use http::header::HeaderName;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// The composed Tower layer type produced by [`build_ambient_layers`].
///
/// This type alias keeps the function signature readable. Each layer wraps
/// the next in a `Stack`, from outermost (first applied) to innermost
/// (last applied).
type AmbientLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TraceLayer<
            tower_http::classify::SharedClassifier<
                tower_http::classify::ServerErrorsAsFailures,
            >,
        >,
        tower::layer::util::Stack<
            SetRequestIdLayer<MakeRequestUuid>,
            tower::layer::util::Identity,
        >,
    >,
>;

/// Builds the ambient Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` to every incoming
///    request, so the observation layer captures it with the rest of the
///    request headers
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `PropagateRequestId` -- copies `X-Request-Id` from the request to the
///    response
///
/// No timeout layer: the worker imposes no per-request deadline; shutdown is
/// drain-based, not cancellation-based.
#[must_use]
pub fn build_ambient_layers() -> AmbientLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            x_request_id.clone(),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use http::Request;
    use tower::ServiceExt;

    #[test]
    fn build_ambient_layers_does_not_panic() {
        let _layers = build_ambient_layers();
    }

    #[tokio::test]
    async fn request_id_is_propagated_to_the_response() {
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(build_ambient_layers());

        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert!(
            response.headers().contains_key("x-request-id"),
            "x-request-id should be set and propagated"
        );
    }
}
