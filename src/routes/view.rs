use std::sync::Arc;

use axum::{
    extract::Path, extract::State, http::StatusCode, response::IntoResponse, routing::get,
    routing::post, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::{TelemetryError, TelemetryViewModel};

// ---

type AppState = Arc<TelemetryViewModel>;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/view", get(get_view))
        .route("/view/page", post(set_page))
        .route("/view/page-size", post(set_page_size))
        .route("/view/search", post(set_search))
        .route("/view/refresh", post(refresh))
        .route("/devices/{api_key}/reading", get(latest_reading))
        .route("/devices/{api_key}/history", get(history))
}

#[derive(Debug, Deserialize)]
struct PageBody {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct PageSizeBody {
    size: usize,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(default)]
    term: String,
}

async fn get_view(State(vm): State<AppState>) -> impl IntoResponse {
    // ---
    let snapshot = vm.snapshot();
    debug!("GET /view - {} entries", snapshot.devices.len());
    Json(snapshot)
}

async fn set_page(State(vm): State<AppState>, Json(body): Json<PageBody>) -> impl IntoResponse {
    // ---
    info!("POST /view/page - index {}", body.index);
    match vm.set_page(body.index).await {
        Ok(()) => (StatusCode::OK, Json(json!(vm.window()))).into_response(),
        Err(e) => rejected(StatusCode::BAD_REQUEST, &e),
    }
}

async fn set_page_size(
    State(vm): State<AppState>,
    Json(body): Json<PageSizeBody>,
) -> impl IntoResponse {
    // ---
    info!("POST /view/page-size - size {}", body.size);
    match vm.set_page_size(body.size).await {
        Ok(()) => (StatusCode::OK, Json(json!(vm.window()))).into_response(),
        Err(e) => rejected(StatusCode::BAD_REQUEST, &e),
    }
}

async fn set_search(State(vm): State<AppState>, Json(body): Json<SearchBody>) -> impl IntoResponse {
    // ---
    info!("POST /view/search - {:?}", body.term);
    vm.set_search_term(&body.term).await;
    Json(vm.snapshot())
}

async fn refresh(State(vm): State<AppState>) -> impl IntoResponse {
    // ---
    let outcome = vm.refresh().await;
    info!("POST /view/refresh - {}", outcome.as_str());
    Json(json!({ "outcome": outcome.as_str() }))
}

async fn latest_reading(
    State(vm): State<AppState>,
    Path(api_key): Path<String>,
) -> impl IntoResponse {
    // ---
    match vm.latest_reading(&api_key).await {
        Ok(Some(reading)) => (StatusCode::OK, Json(json!(reading))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": format!("no reading for {api_key}") })),
        )
            .into_response(),
        Err(e) => rejected(StatusCode::BAD_GATEWAY, &e),
    }
}

async fn history(State(vm): State<AppState>, Path(api_key): Path<String>) -> impl IntoResponse {
    // ---
    match vm.daily_averages(&api_key).await {
        Ok(averages) => (StatusCode::OK, Json(json!(averages))).into_response(),
        Err(e) => rejected(StatusCode::BAD_GATEWAY, &e),
    }
}

fn rejected(status: StatusCode, e: &TelemetryError) -> axum::response::Response {
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}
