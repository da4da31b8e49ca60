use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use airwatch_dashboard::{
    routes, Config, DeviceStatus, ErrorSide, HttpTelemetrySource, Metric, PageRequest,
    RefreshOutcome, TelemetryError, TelemetrySource, TelemetryViewModel,
};
use chrono::{TimeZone, Utc};

// ---

/// In-process stand-in for the REST backend.
#[derive(Default)]
struct StubBackend {
    devices: Mutex<Vec<Value>>,
    readings: Mutex<Vec<Value>>,
    fail_readings: Mutex<bool>,
    fail_lookups: Mutex<bool>,
    /// (path, page, size) of every list request
    seen: Mutex<Vec<(String, usize, usize)>>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: usize,
    size: usize,
}

type Stub = Arc<StubBackend>;

fn page_of(items: &[Value], q: &PageQuery) -> Vec<Value> {
    items
        .iter()
        .skip(q.page.saturating_sub(1) * q.size)
        .take(q.size)
        .cloned()
        .collect()
}

async fn list_devices(State(stub): State<Stub>, Query(q): Query<PageQuery>) -> impl IntoResponse {
    stub.seen.lock().unwrap().push(("devices".into(), q.page, q.size));
    let devices = stub.devices.lock().unwrap();
    Json(json!({ "devices": page_of(&devices, &q), "total": devices.len() }))
}

async fn list_readings(State(stub): State<Stub>, Query(q): Query<PageQuery>) -> impl IntoResponse {
    stub.seen.lock().unwrap().push(("showdetect".into(), q.page, q.size));
    if *stub.fail_readings.lock().unwrap() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "sensor store offline" })),
        )
            .into_response();
    }
    let readings = stub.readings.lock().unwrap();
    Json(json!({ "shows": page_of(&readings, &q), "total": readings.len() })).into_response()
}

async fn one_reading(State(stub): State<Stub>, Path(api_key): Path<String>) -> impl IntoResponse {
    if *stub.fail_lookups.lock().unwrap() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "database connection lost" })),
        );
    }
    let readings = stub.readings.lock().unwrap();
    match readings.iter().find(|r| r["api_key"] == api_key.as_str()) {
        Some(r) => (StatusCode::OK, Json(r.clone())),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "No data found for the given API Key." })),
        ),
    }
}

async fn daily_averages(Path(api_key): Path<String>) -> impl IntoResponse {
    if api_key != "A1" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("No daily averages found for API Key: {api_key}.") })),
        );
    }
    (
        StatusCode::OK,
        Json(json!([{
            "date": "2024-11-01",
            "avg_pm2_5": 11.5,
            "avg_pm10": 20.1,
            "avg_co2": 430.0,
            "avg_tvoc": 0.3,
            "avg_humidity": 61.0,
            "avg_temperature": 29.2
        }])),
    )
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn start_stub(stub: Stub) -> String {
    let app = Router::new()
        .route("/devices/all", get(list_devices))
        .route("/showdetect/all", get(list_readings))
        .route("/showdetect/{api_key}", get(one_reading))
        .route("/avg/daily_averages/{api_key}", get(daily_averages))
        .with_state(stub);
    serve(app).await
}

fn device(api_key: &str, name: &str, location: &str) -> Value {
    json!({
        "api_key": api_key,
        "device_name": name,
        "location": location,
        "device_status": "online",
        "device_settime": 5,
        "user_id": 1
    })
}

fn fleet(stub: &StubBackend, count: usize) {
    let mut devices = stub.devices.lock().unwrap();
    let mut readings = stub.readings.lock().unwrap();
    for i in 0..count {
        devices.push(device(&format!("D{i}"), &format!("Sensor{i}"), "Lobby"));
        readings.push(json!({
            "api_key": format!("D{i}"),
            "pm2_5": i as f64,
            "timestamp": "2024-11-02T10:15:00"
        }));
    }
}

fn view_model_for(base_url: &str, page_size: usize) -> Arc<TelemetryViewModel> {
    let source = HttpTelemetrySource::new(&Config::for_backend(base_url)).unwrap();
    Arc::new(TelemetryViewModel::new(Arc::new(source), page_size))
}

// ---

#[tokio::test]
async fn scenario_reading_arrives_between_refreshes() -> Result<()> {
    // ---
    let stub = Stub::default();
    stub.devices.lock().unwrap().push(device("A1", "Sensor1", "Lobby"));
    let base = start_stub(stub.clone()).await;
    let vm = view_model_for(&base, 8);

    assert_eq!(vm.refresh().await, RefreshOutcome::Applied);
    let view = vm.view();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].device_name, "Sensor1");
    assert_eq!(view[0].device_status, DeviceStatus::Online);
    assert_eq!(view[0].pm2_5, Metric::Unavailable);

    stub.readings
        .lock()
        .unwrap()
        .push(json!({ "api_key": "A1", "pm2_5": 12.3 }));
    assert_eq!(vm.refresh().await, RefreshOutcome::Applied);
    let view = vm.view();
    assert_eq!(view[0].api_key, "A1");
    assert_eq!(view[0].pm2_5, Metric::Value(12.3));
    assert_eq!(view[0].pm10, Metric::Unavailable);

    Ok(())
}

#[tokio::test]
async fn page_index_is_sent_one_based() -> Result<()> {
    // ---
    let stub = Stub::default();
    fleet(&stub, 20);
    let base = start_stub(stub.clone()).await;
    let vm = view_model_for(&base, 8);

    vm.set_page(1).await?;

    let seen = stub.seen.lock().unwrap().clone();
    assert!(seen.contains(&("devices".to_string(), 2, 8)), "seen: {seen:?}");
    assert!(seen.contains(&("showdetect".to_string(), 2, 8)), "seen: {seen:?}");
    let view = vm.view();
    assert_eq!(view[0].api_key, "D8");
    assert_eq!(
        view[0].reading_timestamp,
        Some(Utc.with_ymd_and_hms(2024, 11, 2, 10, 15, 0).unwrap())
    );
    assert_eq!(vm.window().total_count, 20);

    Ok(())
}

#[tokio::test]
async fn backend_message_reaches_error_slot() -> Result<()> {
    // ---
    let stub = Stub::default();
    fleet(&stub, 3);
    let base = start_stub(stub.clone()).await;
    let vm = view_model_for(&base, 8);
    vm.refresh().await;

    *stub.fail_readings.lock().unwrap() = true;
    let outcome = vm.refresh().await;

    assert_eq!(outcome, RefreshOutcome::Degraded(ErrorSide::Readings));
    let error = vm.error().expect("error should be set");
    assert!(error.message.contains("sensor store offline"), "{}", error.message);
    assert!(error.message.contains("503"));
    // Stale readings are still shown
    assert_eq!(vm.view()[2].pm2_5, Metric::Value(2.0));

    Ok(())
}

#[tokio::test]
async fn single_reading_and_history_lookups() -> Result<()> {
    // ---
    let stub = Stub::default();
    fleet(&stub, 2);
    let base = start_stub(stub.clone()).await;
    let source = HttpTelemetrySource::new(&Config::for_backend(&base))?;

    let reading = source.reading("D1").await?.expect("D1 has a reading");
    assert_eq!(reading.pm2_5, Metric::Value(1.0));
    assert!(source.reading("nope").await?.is_none());

    let history = source.daily_averages("A1").await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].avg_pm2_5, 11.5);
    assert!(source.daily_averages("nope").await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn failed_lookup_is_a_gateway_error_not_a_miss() -> Result<()> {
    // ---
    let stub = Stub::default();
    fleet(&stub, 2);
    *stub.fail_lookups.lock().unwrap() = true;
    let backend = start_stub(stub.clone()).await;
    let vm = view_model_for(&backend, 8);
    let dashboard = serve(routes::router(vm.clone())).await;

    let response = Client::new()
        .get(format!("{dashboard}/devices/D1/reading"))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await?;
    let message = body["error"].as_str().unwrap_or_default();
    assert!(message.contains("database connection lost"), "{body}");
    assert!(message.contains("500"), "{body}");

    let error = vm.error().expect("lookup failure should be recorded");
    assert_eq!(error.side, ErrorSide::Lookup);

    *stub.fail_lookups.lock().unwrap() = false;
    let found = Client::new()
        .get(format!("{dashboard}/devices/D1/reading"))
        .send()
        .await?;
    assert_eq!(found.status(), reqwest::StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn unreachable_backend_is_recoverable() -> Result<()> {
    // ---
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut cfg = Config::for_backend(format!("http://{addr}"));
    cfg.request_timeout = Duration::from_secs(2);
    let source = HttpTelemetrySource::new(&cfg)?;

    let err = source
        .list_devices(PageRequest { page_index: 0, page_size: 8 })
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::Transport(_)), "{err}");

    let vm = Arc::new(TelemetryViewModel::new(Arc::new(source), 8));
    assert_eq!(vm.refresh().await, RefreshOutcome::Failed);
    assert!(vm.view().is_empty());
    assert_eq!(vm.error().map(|e| e.side), Some(ErrorSide::Both));

    Ok(())
}

#[tokio::test]
async fn json_surface_drives_the_view_model() -> Result<()> {
    // ---
    let stub = Stub::default();
    fleet(&stub, 20);
    stub.devices
        .lock()
        .unwrap()
        .insert(0, device("K", "Kitchen", "Floor 2"));
    let backend = start_stub(stub.clone()).await;
    let vm = view_model_for(&backend, 8);
    vm.refresh().await;
    let dashboard = serve(routes::router(vm.clone())).await;
    let client = Client::new();

    let health: Value = client.get(format!("{dashboard}/health")).send().await?.json().await?;
    assert_eq!(health["status"], "ok");

    let view: Value = client.get(format!("{dashboard}/view")).send().await?.json().await?;
    assert_eq!(view["devices"].as_array().map(Vec::len), Some(8));
    assert_eq!(view["window"]["page_index"], 0);
    assert_eq!(view["devices"][0]["pm2_5"], "unavailable");

    let window: Value = client
        .post(format!("{dashboard}/view/page"))
        .json(&json!({ "index": 2 }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(window["page_index"], 2);

    let unreachable = client
        .post(format!("{dashboard}/view/page"))
        .json(&json!({ "index": usize::MAX }))
        .send()
        .await?;
    assert_eq!(unreachable.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(vm.window().page_index, 2);

    let bad = client
        .post(format!("{dashboard}/view/page-size"))
        .json(&json!({ "size": 0 }))
        .send()
        .await?;
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(vm.window().page_index, 2);

    let ok = client
        .post(format!("{dashboard}/view/page-size"))
        .json(&json!({ "size": 12 }))
        .send()
        .await?;
    assert!(ok.status().is_success());
    assert_eq!(vm.window().page_index, 0);
    assert_eq!(vm.window().page_size, 12);

    let searched: Value = client
        .post(format!("{dashboard}/view/search"))
        .json(&json!({ "term": "KITCHEN" }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(searched["devices"].as_array().map(Vec::len), Some(1));
    assert_eq!(searched["devices"][0]["api_key"], "K");

    let refreshed: Value = client
        .post(format!("{dashboard}/view/refresh"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(refreshed["outcome"], "applied");

    let missing = client
        .get(format!("{dashboard}/devices/nope/reading"))
        .send()
        .await?;
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    Ok(())
}
