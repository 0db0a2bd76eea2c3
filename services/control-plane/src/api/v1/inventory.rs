//! Read-only views of instances, subscriptions and node health.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/instances", get(list_instances))
        .route("/subscriptions", get(list_subscriptions))
        .route("/nodes", get(list_nodes))
}

#[derive(Debug, Serialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

async fn list_instances(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .controller()
        .instances()
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(ListResponse { items }))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .controller()
        .subscriptions()
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(ListResponse { items }))
}

/// Last cached health snapshot; does not probe.
async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller().node_status().await)
}
