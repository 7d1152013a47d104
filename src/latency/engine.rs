//! Per-record latency computation

use super::clock::ClockOffset;
use crate::capture::CaptureRecord;
use chrono::{DateTime, Utc};

/// Corrected latency in milliseconds
///
/// `local_lead_ms` is how far the local clock runs ahead of the server clock.
/// A negative result is a valid measurement.
pub fn corrected_latency_ms(
    local_ts: DateTime<Utc>,
    event_ts: DateTime<Utc>,
    local_lead_ms: f64,
) -> f64 {
    let raw_us = (local_ts - event_ts).num_microseconds().unwrap_or(i64::MAX);
    raw_us as f64 / 1_000.0 - local_lead_ms
}

/// Converts capture records into latency values under one fixed offset
#[derive(Debug, Clone, Copy)]
pub struct LatencyEngine {
    offset: ClockOffset,
}

impl LatencyEngine {
    /// Fix the offset for every computation this engine performs
    pub fn new(offset: ClockOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> &ClockOffset {
        &self.offset
    }

    pub fn latency_ms(&self, local_ts: DateTime<Utc>, event_ts: DateTime<Utc>) -> f64 {
        corrected_latency_ms(local_ts, event_ts, self.offset.local_lead_ms())
    }

    pub fn record_latency(&self, record: &CaptureRecord) -> f64 {
        self.latency_ms(record.local_ts, record.event_ts)
    }

    /// One latency per record, in record order
    pub fn evaluate(&self, records: &[CaptureRecord]) -> Vec<f64> {
        records.iter().map(|r| self.record_latency(r)).collect()
    }

    /// Index and value of the highest latency; the first one wins ties
    pub fn peak(&self, records: &[CaptureRecord]) -> Option<(usize, f64)> {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, self.record_latency(r)))
            .fold(None, |best, (i, latency)| match best {
                Some((_, top)) if top >= latency => best,
                _ => Some((i, latency)),
            })
    }
}
