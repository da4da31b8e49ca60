//! Application entry point for the `airwatch-dashboard` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Building the HTTP client for the REST backend
//! - Loading the first page and starting the polling timer
//! - Binding the Axum HTTP server that exposes the merged view as JSON
//!
//! # Environment Variables
//! - `BACKEND_URL` (**required**) – REST backend base URL
//! - `POLL_INTERVAL_MS` (optional) – polling interval (default: 60000)
//! - `DASHBOARD_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `DASHBOARD_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config` for the remaining variables.
use std::{env, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use airwatch_dashboard::{config, routes, HttpTelemetrySource, TelemetryViewModel};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let source = HttpTelemetrySource::new(&cfg)
        .map_err(|e| anyhow::anyhow!("Failed to build backend client: {}", e))?;

    let view_model = Arc::new(
        TelemetryViewModel::new(Arc::new(source), cfg.page_size).with_error_ttl(cfg.error_ttl),
    );

    // A failed first load is not fatal; polling retries on schedule.
    let outcome = view_model.refresh().await;
    tracing::info!("Initial load: {}", outcome.as_str());

    view_model.start_polling(cfg.poll_interval);

    let app: Router = routes::router(view_model.clone());

    tracing::info!("Listening on {}", cfg.bind_addr);

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    view_model.stop_polling();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `DASHBOARD_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `DASHBOARD_LOG_LEVEL` env var
///
/// Call once at startup before any tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("DASHBOARD_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // RUST_LOG wins over DASHBOARD_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("DASHBOARD_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper_util=warn,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
