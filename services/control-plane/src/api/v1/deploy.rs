//! Operator-driven deployment.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/deploy", post(deploy))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub service_type: String,
    pub node_name: String,
}

/// Deploy a new instance on an explicit node; responds with the instance.
async fn deploy(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<DeployRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = state
        .controller()
        .deploy_on(&req.service_type, &req.node_name)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    Ok((StatusCode::CREATED, Json(instance)))
}
