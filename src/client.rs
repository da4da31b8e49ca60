//! REST backend access.
//!
//! `TelemetrySource` is the seam the view model fetches through;
//! `HttpTelemetrySource` is the reqwest implementation used in production.
//! Requests carry the ambient session (cookie store plus an optional fixed
//! cookie header); authentication itself happens elsewhere.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::TelemetryError;
use crate::models::{DailyAverage, DevicePage, PageRequest, Reading, ReadingPage};
use crate::Config;

// ---

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// `GET /devices/all?page=&size=`
    async fn list_devices(&self, page: PageRequest) -> Result<DevicePage, TelemetryError>;

    /// `GET /showdetect/all?page=&size=`
    async fn list_readings(&self, page: PageRequest) -> Result<ReadingPage, TelemetryError>;

    /// `GET /showdetect/{api_key}`; `None` when the backend has no reading.
    async fn reading(&self, api_key: &str) -> Result<Option<Reading>, TelemetryError>;

    /// `GET /avg/daily_averages/{api_key}`; empty when there is no history.
    async fn daily_averages(&self, api_key: &str) -> Result<Vec<DailyAverage>, TelemetryError>;
}

#[derive(Debug, Clone)]
pub struct HttpTelemetrySource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTelemetrySource {
    // ---
    pub fn new(config: &Config) -> Result<Self, TelemetryError> {
        // ---
        let base_url = Url::parse(config.backend_url.trim())
            .map_err(|e| TelemetryError::InvalidBaseUrl(format!("{}: {}", config.backend_url, e)))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(TelemetryError::InvalidBaseUrl(config.backend_url.clone()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(cookie) = &config.session_cookie {
            let mut value =
                HeaderValue::from_str(cookie).map_err(|_| TelemetryError::InvalidSessionCookie)?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(HttpTelemetrySource { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TelemetryError> {
        // ---
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TelemetryError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T>(&self, url: Url, query: &[(&str, usize)]) -> Result<T, TelemetryError>
    where
        T: DeserializeOwned,
    {
        // ---
        debug!("GET {} {:?}", url.path(), query);

        let response = self.client.get(url.clone()).query(query).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = TelemetryError::from_status(status.as_u16(), &body);
            if status != StatusCode::NOT_FOUND {
                warn!("GET {} failed: {}", url.path(), err);
            }
            return Err(err);
        }

        serde_json::from_str(&body).map_err(|source| TelemetryError::Decode {
            endpoint: url.path().to_string(),
            source,
        })
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn list_devices(&self, page: PageRequest) -> Result<DevicePage, TelemetryError> {
        let url = self.endpoint(&["devices", "all"])?;
        self.get_json(url, &page.query()).await
    }

    async fn list_readings(&self, page: PageRequest) -> Result<ReadingPage, TelemetryError> {
        let url = self.endpoint(&["showdetect", "all"])?;
        self.get_json(url, &page.query()).await
    }

    async fn reading(&self, api_key: &str) -> Result<Option<Reading>, TelemetryError> {
        let url = self.endpoint(&["showdetect", api_key])?;
        match self.get_json(url, &[]).await {
            Ok(reading) => Ok(Some(reading)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn daily_averages(&self, api_key: &str) -> Result<Vec<DailyAverage>, TelemetryError> {
        let url = self.endpoint(&["avg", "daily_averages", api_key])?;
        match self.get_json(url, &[]).await {
            Ok(averages) => Ok(averages),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
