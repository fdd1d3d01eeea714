//! Route handlers.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::state::AppState;
use crate::status::StatusSnapshot;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(status))
        .route("/trigger-job", get(trigger_job))
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot().await)
}

#[derive(Deserialize)]
struct TriggerQuery {
    token: Option<String>,
}

async fn trigger_job(
    State(state): State<AppState>,
    Query(query): Query<TriggerQuery>,
) -> impl IntoResponse {
    let response = state.gateway.handle(query.token.as_deref()).await;
    (response.status(), Json(response.body()))
}
