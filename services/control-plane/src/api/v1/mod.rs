//! API v1 routes.

mod alerts;
mod deploy;
mod inventory;
mod subscriptions;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(subscriptions::routes())
        .merge(alerts::routes())
        .merge(deploy::routes())
        .merge(inventory::routes())
}
