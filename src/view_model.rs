//! Searchable, paginated view joining devices with their latest readings.
//!
//! One `PageWindow` is shared by both collections, so the device page and
//! the reading page are always requested with the same index and size.
//!
//! Refresh policy: every refresh is tagged with a sequence number and the
//! window it targets. A response is applied only if the window still
//! matches and no newer refresh has been applied; anything else is dropped.
//! When only one side fails, that side keeps its last good snapshot as long
//! as the snapshot belongs to the same window.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::TelemetrySource;
use crate::error::{ErrorSide, TelemetryError, ViewError};
use crate::merge::{filter, merge};
use crate::models::{
    DailyAverage, Device, DevicePage, MergedDeviceView, PageRequest, PageWindow, Reading,
    ReadingPage, SearchFilter,
};
use crate::poller::Poller;

// ---

const DEFAULT_ERROR_TTL: Duration = Duration::from_secs(3);

/// What happened to the results of one `refresh()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Both collections fetched and merged.
    Applied,
    /// One side failed; its last good snapshot was reused.
    Degraded(ErrorSide),
    /// Both sides failed.
    Failed,
    /// A newer request superseded this one; nothing changed.
    Discarded,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Applied => "applied",
            RefreshOutcome::Degraded(_) => "degraded",
            RefreshOutcome::Failed => "failed",
            RefreshOutcome::Discarded => "discarded",
        }
    }
}

/// Everything a view needs to render one frame.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub window: PageWindow,
    pub search: String,
    pub loading: bool,
    pub error: Option<ViewError>,
    pub devices: Vec<MergedDeviceView>,
}

/// A fetched collection and the page it was fetched for.
#[derive(Debug)]
struct Snapshot<T> {
    items: Vec<T>,
    request: PageRequest,
}

#[derive(Debug)]
struct State {
    window: PageWindow,
    search: SearchFilter,
    devices: Option<Snapshot<Device>>,
    readings: Option<Snapshot<Reading>>,
    readings_total: usize,
    merged: Vec<MergedDeviceView>,
    next_seq: u64,
    applied_seq: u64,
    in_flight: usize,
    error: Option<ViewError>,
}

impl State {
    fn new(page_size: usize) -> Self {
        State {
            window: PageWindow::new(page_size),
            search: SearchFilter::default(),
            devices: None,
            readings: None,
            readings_total: 0,
            merged: Vec::new(),
            next_seq: 0,
            applied_seq: 0,
            in_flight: 0,
            error: None,
        }
    }

    fn apply(
        &mut self,
        seq: u64,
        request: PageRequest,
        devices: Result<DevicePage, TelemetryError>,
        readings: Result<ReadingPage, TelemetryError>,
    ) -> RefreshOutcome {
        // ---
        if request != self.window.request() || seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "Discarding stale refresh");
            return RefreshOutcome::Discarded;
        }
        self.applied_seq = seq;

        let device_err = match devices {
            Ok(page) => {
                self.window.total_count = page.total;
                self.devices = Some(Snapshot {
                    items: page.devices,
                    request,
                });
                None
            }
            Err(e) => {
                retain_if_same_window(&mut self.devices, request);
                Some(e)
            }
        };

        let reading_err = match readings {
            Ok(page) => {
                self.readings_total = page.total;
                self.readings = Some(Snapshot {
                    items: page.shows,
                    request,
                });
                None
            }
            Err(e) => {
                retain_if_same_window(&mut self.readings, request);
                Some(e)
            }
        };

        self.merged = merge(items(&self.devices), items(&self.readings));

        match (device_err, reading_err) {
            (None, None) => RefreshOutcome::Applied,
            (Some(e), None) => {
                warn!("Device fetch failed, keeping last snapshot: {}", e);
                self.error = Some(ViewError::new(ErrorSide::Devices, e.to_string()));
                RefreshOutcome::Degraded(ErrorSide::Devices)
            }
            (None, Some(e)) => {
                warn!("Reading fetch failed, keeping last snapshot: {}", e);
                self.error = Some(ViewError::new(ErrorSide::Readings, e.to_string()));
                RefreshOutcome::Degraded(ErrorSide::Readings)
            }
            (Some(d), Some(r)) => {
                warn!("Both fetches failed: devices: {}; readings: {}", d, r);
                self.error = Some(ViewError::new(
                    ErrorSide::Both,
                    format!("devices: {d}; readings: {r}"),
                ));
                RefreshOutcome::Failed
            }
        }
    }
}

fn retain_if_same_window<T>(snapshot: &mut Option<Snapshot<T>>, request: PageRequest) {
    if snapshot.as_ref().is_some_and(|s| s.request != request) {
        *snapshot = None;
    }
}

fn items<T>(snapshot: &Option<Snapshot<T>>) -> &[T] {
    snapshot.as_ref().map(|s| s.items.as_slice()).unwrap_or(&[])
}

/// Owns the device and reading snapshots, the shared page window and the
/// search term. Methods are the only mutation surface.
pub struct TelemetryViewModel {
    source: Arc<dyn TelemetrySource>,
    state: RwLock<State>,
    error_ttl: Duration,
    revision: watch::Sender<u64>,
    poller: Mutex<Option<Poller>>,
}

impl TelemetryViewModel {
    // ---
    pub fn new(source: Arc<dyn TelemetrySource>, page_size: usize) -> Self {
        let (revision, _) = watch::channel(0);
        TelemetryViewModel {
            source,
            state: RwLock::new(State::new(page_size)),
            error_ttl: DEFAULT_ERROR_TTL,
            revision,
            poller: Mutex::new(None),
        }
    }

    /// How long a transient error stays visible through `error()`.
    pub fn with_error_ttl(mut self, ttl: Duration) -> Self {
        self.error_ttl = ttl;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn poller_slot(&self) -> MutexGuard<'_, Option<Poller>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    // --- Operations

    /// Move to zero-based page `index` and fetch it.
    ///
    /// `usize::MAX` has no 1-based counterpart and is rejected without
    /// touching the window.
    pub async fn set_page(&self, index: usize) -> Result<(), TelemetryError> {
        if index.checked_add(1).is_none() {
            return Err(TelemetryError::InvalidPageIndex(index));
        }
        self.write().window.page_index = index;
        self.notify();
        self.refresh().await;
        Ok(())
    }

    /// Change the page size, go back to the first page and fetch it.
    pub async fn set_page_size(&self, size: usize) -> Result<(), TelemetryError> {
        if size == 0 {
            return Err(TelemetryError::InvalidPageSize(size));
        }
        {
            let mut state = self.write();
            state.window.page_size = size;
            state.window.page_index = 0;
        }
        self.notify();
        self.refresh().await;
        Ok(())
    }

    /// Narrow the loaded page to entries whose name or location contains
    /// `text`. Never searches the backend; only the page index is reset,
    /// and page 0 is fetched if that moved the window.
    pub async fn set_search_term(&self, text: &str) {
        let moved = {
            let mut state = self.write();
            state.search = SearchFilter::new(text);
            let moved = state.window.page_index != 0;
            state.window.page_index = 0;
            moved
        };
        self.notify();
        if moved {
            self.refresh().await;
        }
    }

    /// Fetch devices and readings for the current window and merge them.
    ///
    /// Safe to call concurrently; results of superseded calls are dropped.
    pub async fn refresh(&self) -> RefreshOutcome {
        // ---
        let (seq, request) = {
            let mut state = self.write();
            state.next_seq += 1;
            state.in_flight += 1;
            (state.next_seq, state.window.request())
        };
        let _in_flight = InFlight(self);
        self.notify();

        debug!(
            seq,
            page = request.backend_page(),
            size = request.page_size,
            "Refresh started"
        );

        let (devices, readings) = tokio::join!(
            self.source.list_devices(request),
            self.source.list_readings(request)
        );

        let outcome = self.write().apply(seq, request, devices, readings);
        debug!(seq, outcome = outcome.as_str(), "Refresh settled");
        outcome
    }

    // --- Reads

    /// Current page, filtered by the search term, in device order.
    pub fn view(&self) -> Vec<MergedDeviceView> {
        let state = self.read();
        filter(&state.merged, &state.search)
    }

    pub fn window(&self) -> PageWindow {
        self.read().window
    }

    pub fn search_term(&self) -> String {
        self.read().search.term().to_string()
    }

    /// Total reported by the last successful reading fetch.
    pub fn readings_total(&self) -> usize {
        self.read().readings_total
    }

    pub fn is_loading(&self) -> bool {
        self.read().in_flight > 0
    }

    /// Last error, unless it has outlived the error TTL.
    pub fn error(&self) -> Option<ViewError> {
        self.read()
            .error
            .as_ref()
            .filter(|e| e.at.elapsed() < self.error_ttl)
            .cloned()
    }

    pub fn clear_error(&self) {
        self.write().error = None;
        self.notify();
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let (window, search, loading, devices) = {
            let state = self.read();
            (
                state.window,
                state.search.term().to_string(),
                state.in_flight > 0,
                filter(&state.merged, &state.search),
            )
        };
        ViewSnapshot {
            window,
            search,
            loading,
            error: self.error(),
            devices,
        }
    }

    /// Receiver that changes whenever window, view, or error change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // --- Lookups

    /// Latest reading for one device, outside the paged view.
    ///
    /// `Ok(None)` means the backend has no reading for `api_key`. Failures
    /// are returned and also land in the error slot.
    pub async fn latest_reading(&self, api_key: &str) -> Result<Option<Reading>, TelemetryError> {
        self.source
            .reading(api_key)
            .await
            .inspect_err(|e| self.record_lookup_error(api_key, e))
    }

    /// Daily averages for the history chart of one device.
    pub async fn daily_averages(&self, api_key: &str) -> Result<Vec<DailyAverage>, TelemetryError> {
        self.source
            .daily_averages(api_key)
            .await
            .inspect_err(|e| self.record_lookup_error(api_key, e))
    }

    fn record_lookup_error(&self, api_key: &str, e: &TelemetryError) {
        warn!(api_key, "Lookup failed: {}", e);
        self.write().error = Some(ViewError::new(ErrorSide::Lookup, e.to_string()));
        self.notify();
    }

    // --- Polling

    /// Call `refresh()` every `interval`. Restarts the timer if already polling.
    pub fn start_polling(self: &Arc<Self>, interval: Duration) {
        let poller = Poller::spawn(Arc::downgrade(self), interval);
        if let Some(previous) = self.poller_slot().replace(poller) {
            debug!(
                old_ms = previous.period().as_millis() as u64,
                "Restarting polling"
            );
            previous.stop();
        }
    }

    /// Cancel the timer. No-op when not polling.
    pub fn stop_polling(&self) {
        if let Some(poller) = self.poller_slot().take() {
            poller.stop();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller_slot().is_some()
    }
}

/// Decrements the in-flight count even if the refresh future is dropped.
struct InFlight<'a>(&'a TelemetryViewModel);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.0.write();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.0.notify();
    }
}
