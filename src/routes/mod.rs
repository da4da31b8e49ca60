use std::sync::Arc;

use axum::Router;

use crate::TelemetryViewModel;

mod health;
mod view;

// ---

pub fn router(view_model: Arc<TelemetryViewModel>) -> Router {
    // ---
    Router::new()
        .merge(view::router())
        .merge(health::router())
        .with_state(view_model)
}
