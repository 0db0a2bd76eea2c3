//! HTTP API handlers and routing.

pub mod error;
mod health;
pub mod request_context;
mod v1;

use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(Any);

    let request_id = HeaderName::from_static(request_context::REQUEST_ID_HEADER);

    Router::new()
        .merge(health::routes())
        .nest("/v1", v1::routes())
        // Later layers wrap earlier ones: the request id is set before tracing sees the request
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arha_reconcile::{FrequencyLimit, ServiceSpec};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::agent::RecordingAgentChannel;
    use crate::controller::{Collaborators, Controller};
    use crate::health::StaticNodeHealth;
    use crate::inventory::NodeInventory;
    use crate::launcher::MockLauncher;
    use crate::scheduler::PlannerSettings;
    use crate::store::MemoryStore;

    fn router() -> Router {
        let spec = ServiceSpec {
            service_type: "pose".to_string(),
            frequency_limit: FrequencyLimit::new(20.0, 10.0),
            work_ability: [("gpu-a".to_string(), 70.0)].into(),
            gpu_memory_request: 2,
        };
        let controller = Controller::new(
            Collaborators {
                store: Arc::new(MemoryStore::with_specs(vec![spec])),
                launcher: Arc::new(MockLauncher::new()),
                health: Arc::new(StaticNodeHealth::healthy()),
                agents: Arc::new(RecordingAgentChannel::new()),
            },
            NodeInventory::new().with_node("gpu-a", "192.168.1.10", 8),
            PlannerSettings::default(),
        );
        create_router(AppState::new(Arc::new(controller)))
    }

    #[tokio::test]
    async fn test_request_id_generated_when_absent() {
        let response = router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[request_context::REQUEST_ID_HEADER]
            .to_str()
            .unwrap();
        assert_eq!(id.len(), 36);
    }

    #[tokio::test]
    async fn test_malformed_body_is_client_error() {
        let response = router()
            .oneshot(
                Request::post("/v1/subscribe")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"ip": "10.1.0.1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_empty_list_views() {
        let response = router()
            .oneshot(Request::get("/v1/instances").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"items": []}));
    }
}
