//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Comic endpoints are mounted under `/api/v1`; probes and metrics live at
//! the root.

pub mod dto;
pub mod handlers;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

/// Full application: API routes plus HTTP tracing, CORS and a hard
/// request timeout slightly above the store deadline.
pub fn app(state: AppState) -> Router {
    build_router()
        .layer(hard_timeout(state.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Answers 504 once a request outlives its store deadline by a second.
fn hard_timeout(request_timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(
        StatusCode::GATEWAY_TIMEOUT,
        request_timeout.saturating_add(Duration::from_secs(1)),
    )
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_request_gets_gateway_timeout() {
        let router: Router = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    "late"
                }),
            )
            .layer(hard_timeout(Duration::from_secs(2)));
        let Ok(request) = Request::builder().uri("/slow").body(Body::empty()) else {
            panic!("request should build");
        };
        let Ok(response) = router.oneshot(request).await else {
            panic!("router should answer");
        };
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
