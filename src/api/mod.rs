pub mod builds;
pub mod push;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(push::router())
        .merge(builds::router())
        .route("/robots.txt", get(robots))
}

/// The complete application with middleware and state attached.
pub fn app(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(router())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn robots() -> &'static str {
    "User-agent: *\nDisallow: /"
}
