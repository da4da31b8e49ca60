//! Left-outer join of devices with their latest readings.

use std::collections::HashMap;

use crate::models::{Device, MergedDeviceView, Reading, SearchFilter};

// ---

/// Join `devices` with `readings` on `api_key`.
///
/// Devices drive the result: every device appears exactly once, in its
/// original order. When several readings share an api_key the first one
/// wins. Devices without a reading get every metric set to `Unavailable`.
pub fn merge(devices: &[Device], readings: &[Reading]) -> Vec<MergedDeviceView> {
    // ---
    let mut by_key: HashMap<&str, &Reading> = HashMap::with_capacity(readings.len());
    for reading in readings {
        by_key.entry(reading.api_key.as_str()).or_insert(reading);
    }

    devices
        .iter()
        .map(|device| match by_key.get(device.api_key.as_str()) {
            Some(reading) => MergedDeviceView::with_reading(device, reading),
            None => MergedDeviceView::without_reading(device),
        })
        .collect()
}

/// Order-preserving subset of `view` matching `filter`.
pub fn filter(view: &[MergedDeviceView], filter: &SearchFilter) -> Vec<MergedDeviceView> {
    view.iter().filter(|e| filter.matches(e)).cloned().collect()
}
