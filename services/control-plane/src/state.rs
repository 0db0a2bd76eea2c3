//! Application state shared across request handlers.

use std::sync::Arc;

use crate::controller::Controller;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    controller: Arc<Controller>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { controller }),
        }
    }

    /// Get a reference to the subscription controller.
    pub fn controller(&self) -> &Controller {
        &self.inner.controller
    }
}
