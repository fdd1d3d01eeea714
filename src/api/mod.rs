//! HTTP layer -- axum routes over the status reporter and trigger gateway.

mod routes;
pub mod state;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower_http::trace::TraceLayer;

use self::state::AppState;

/// Build the application router.
///
/// Request spans carry the path only; the query string holds the trigger
/// secret and must stay out of the logs.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            tracing::info_span!("http", method = %req.method(), path = %req.uri().path())
        }))
        .with_state(state)
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}
