// src/routes/health.rs
//! Liveness endpoint for the dashboard service.
//!
//! Sibling module of the `routes` gateway: this file owns the handler, the
//! gateway merges the returned subrouter. The check never calls the backend,
//! so a slow or failing backend does not make the service look dead.

use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Subrouter with the `/health` route, generic over the gateway state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
