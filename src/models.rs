//! Data models consumed and produced by the telemetry view model.
//!
//! Devices and readings are read-only snapshots of what the REST backend
//! returns. `MergedDeviceView` is derived on every refresh and never
//! persisted.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

// ---

/// Page sizes offered by the presentation layer.
pub const PAGE_SIZE_OPTIONS: [usize; 3] = [8, 12, 16];

/// Wire marker for a telemetry field without data.
pub const UNAVAILABLE: &str = "unavailable";

/// Connectivity state the backend records when a device's socket opens or closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Registered sensor unit as listed by `/devices/all`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    // ---
    pub api_key: String,
    pub device_name: String,
    pub location: String,
    #[serde(default)]
    pub device_status: DeviceStatus,
    /// Reporting interval in minutes, never below 1.
    #[serde(default = "default_settime", deserialize_with = "at_least_one")]
    pub device_settime: u32,
    #[serde(default, alias = "user_id")]
    pub owner_user_id: i64,
}

fn default_settime() -> u32 {
    1
}

fn at_least_one<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let minutes = Option::<u32>::deserialize(deserializer)?;
    Ok(minutes.unwrap_or(1).max(1))
}

/// A single telemetry value, or the explicit absence of one.
///
/// `Unavailable` is distinct from `Value(0.0)` so a view can tell "no data
/// yet" apart from a zero reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Metric {
    Value(f64),
    #[default]
    Unavailable,
}

impl Metric {
    pub fn value(self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(v),
            Metric::Unavailable => None,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Metric::Value(_))
    }
}

impl From<f64> for Metric {
    fn from(v: f64) -> Self {
        Metric::Value(v)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Value(v) => write!(f, "{v}"),
            Metric::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

impl Serialize for Metric {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Metric::Value(v) => serializer.serialize_f64(*v),
            Metric::Unavailable => serializer.serialize_str(UNAVAILABLE),
        }
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(Metric::Unavailable),
            Some(Raw::Number(v)) => Ok(Metric::Value(v)),
            Some(Raw::Text(s)) if s.trim().eq_ignore_ascii_case(UNAVAILABLE) => {
                Ok(Metric::Unavailable)
            }
            Some(Raw::Text(s)) => s.trim().parse::<f64>().map(Metric::Value).map_err(|_| {
                de::Error::invalid_value(de::Unexpected::Str(&s), &"a number or \"unavailable\"")
            }),
        }
    }
}

/// Latest telemetry snapshot for one device (a "showdetect" record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub api_key: String,
    #[serde(default)]
    pub pm2_5: Metric,
    #[serde(default)]
    pub pm10: Metric,
    #[serde(default)]
    pub co2: Metric,
    #[serde(default)]
    pub tvoc: Metric,
    #[serde(default)]
    pub humidity: Metric,
    #[serde(default)]
    pub temperature: Metric,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Accept RFC 3339 or an offset-less ISO 8601 timestamp; the latter is UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(raw), &"an ISO 8601 timestamp"))
}

/// Device metadata joined with its (possibly absent) latest reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDeviceView {
    // ---
    pub api_key: String,
    pub device_name: String,
    pub location: String,
    pub device_status: DeviceStatus,
    pub device_settime: u32,
    pub owner_user_id: i64,
    pub pm2_5: Metric,
    pub pm10: Metric,
    pub co2: Metric,
    pub tvoc: Metric,
    pub humidity: Metric,
    pub temperature: Metric,
    pub reading_timestamp: Option<DateTime<Utc>>,
}

impl MergedDeviceView {
    // ---
    /// Entry for a device that has no reading yet.
    pub fn without_reading(device: &Device) -> Self {
        // ---
        MergedDeviceView {
            api_key: device.api_key.clone(),
            device_name: device.device_name.clone(),
            location: device.location.clone(),
            device_status: device.device_status,
            device_settime: device.device_settime,
            owner_user_id: device.owner_user_id,
            pm2_5: Metric::Unavailable,
            pm10: Metric::Unavailable,
            co2: Metric::Unavailable,
            tvoc: Metric::Unavailable,
            humidity: Metric::Unavailable,
            temperature: Metric::Unavailable,
            reading_timestamp: None,
        }
    }

    pub fn with_reading(device: &Device, reading: &Reading) -> Self {
        // ---
        MergedDeviceView {
            pm2_5: reading.pm2_5,
            pm10: reading.pm10,
            co2: reading.co2,
            tvoc: reading.tvoc,
            humidity: reading.humidity,
            temperature: reading.temperature,
            reading_timestamp: reading.timestamp,
            ..Self::without_reading(device)
        }
    }

    pub fn has_reading(&self) -> bool {
        [self.pm2_5, self.pm10, self.co2, self.tvoc, self.humidity, self.temperature]
            .iter()
            .any(|m| m.is_available())
    }
}

/// One page of a paginated collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub page_index: usize,
    pub page_size: usize,
    pub total_count: usize,
}

impl PageWindow {
    pub fn new(page_size: usize) -> Self {
        PageWindow {
            page_index: 0,
            page_size: page_size.max(1),
            total_count: 0,
        }
    }

    /// Request parameters for this window, ignoring the total.
    pub fn request(&self) -> PageRequest {
        PageRequest {
            page_index: self.page_index,
            page_size: self.page_size,
        }
    }

    pub fn page_count(&self) -> usize {
        self.total_count.div_ceil(self.page_size.max(1))
    }
}

/// The (index, size) pair sent to the backend for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    /// Zero-based page index.
    pub page_index: usize,
    pub page_size: usize,
}

impl PageRequest {
    /// The backend counts pages from 1.
    pub fn backend_page(&self) -> usize {
        self.page_index.saturating_add(1)
    }

    pub fn query(&self) -> [(&'static str, usize); 2] {
        [("page", self.backend_page()), ("size", self.page_size)]
    }
}

/// Case-insensitive substring filter over device name and location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    needle: String,
}

impl SearchFilter {
    pub fn new(text: &str) -> Self {
        SearchFilter {
            needle: text.trim().to_lowercase(),
        }
    }

    pub fn term(&self) -> &str {
        &self.needle
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    pub fn matches(&self, entry: &MergedDeviceView) -> bool {
        self.is_empty()
            || entry.device_name.to_lowercase().contains(&self.needle)
            || entry.location.to_lowercase().contains(&self.needle)
    }
}

/// Envelope returned by `GET /devices/all`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DevicePage {
    pub devices: Vec<Device>,
    #[serde(default)]
    pub total: usize,
}

/// Envelope returned by `GET /showdetect/all`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReadingPage {
    pub shows: Vec<Reading>,
    #[serde(default)]
    pub total: usize,
}

/// One day of averaged telemetry for the history chart.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DailyAverage {
    pub date: NaiveDate,
    pub avg_pm2_5: f64,
    pub avg_pm10: f64,
    pub avg_co2: f64,
    pub avg_tvoc: f64,
    pub avg_humidity: f64,
    pub avg_temperature: f64,
}
