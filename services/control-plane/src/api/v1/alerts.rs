//! Failure alert intake.
//!
//! Monitors report lost worker nodes and crashed pods here.

use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/alerts", post(handle_alert))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "alertType", content = "alertContent", rename_all = "snake_case")]
pub enum Alert {
    WorkernodeFailure {
        #[serde(rename = "nodeName")]
        node_name: String,
    },
    PodFailure {
        #[serde(rename = "podName")]
        pod_name: String,
    },
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct AlertResponse {
    pub removed: Vec<String>,
    pub evicted: usize,
}

async fn handle_alert(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(alert): Json<Alert>,
) -> Result<impl IntoResponse, ApiError> {
    info!(request_id = %ctx.request_id, alert = ?alert, "Received alert");

    let controller = state.controller();
    let report = match &alert {
        Alert::WorkernodeFailure { node_name } => controller.node_failure(node_name).await,
        Alert::PodFailure { pod_name } => controller.pod_failure(pod_name).await,
    }
    .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    Ok(Json(AlertResponse {
        removed: report.removed,
        evicted: report.evicted.len(),
    }))
}
