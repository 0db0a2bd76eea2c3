//! Agent subscription endpoints.

use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Agent address reconfiguration notices are sent to.
    pub ip: String,
    pub port: u16,
    pub service_type: String,
}

/// Where the agent should fetch its service, and how often.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct SubscribeResponse {
    pub ip: String,
    pub port: u16,
    pub frequency: f64,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct UnsubscribeResponse {
    pub removed: usize,
}

async fn subscribe(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.service_type.trim().is_empty() {
        return Err(
            ApiError::bad_request("invalid_request", "serviceType is required")
                .with_request_id(ctx.request_id),
        );
    }

    let admission = state
        .controller()
        .subscribe(&req.ip, req.port, &req.service_type)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok(Json(SubscribeResponse {
        ip: admission.host_ip,
        port: admission.host_port,
        frequency: admission.frequency,
    }))
}

async fn unsubscribe(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<UnsubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .controller()
        .unsubscribe(&req.ip, req.port)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    Ok(Json(UnsubscribeResponse { removed }))
}
