//! Telemetry view model for the air-quality monitoring dashboard.
//!
//! Joins paginated device metadata with paginated latest readings by
//! `api_key`, keeps the result fresh on a timer, and exposes a searchable,
//! paginated view to a presentation layer.
//!
//! Module boundaries:
//! - `models` – wire and view types
//! - `merge` – left-outer join and search filtering
//! - `client` – REST backend access behind the `TelemetrySource` trait
//! - `view_model` – state, refresh policy and polling lifecycle
//! - `routes` – JSON surface over a shared view model

pub mod client;
pub mod config;
pub mod error;
pub mod merge;
pub mod models;
pub mod poller;
pub mod routes;
pub mod view_model;

pub use client::{HttpTelemetrySource, TelemetrySource};
pub use config::Config;
pub use error::{ErrorSide, TelemetryError, ViewError};
pub use models::{
    DailyAverage, Device, DevicePage, DeviceStatus, MergedDeviceView, Metric, PageRequest,
    PageWindow, Reading, ReadingPage, SearchFilter, PAGE_SIZE_OPTIONS,
};
pub use view_model::{RefreshOutcome, TelemetryViewModel, ViewSnapshot};
