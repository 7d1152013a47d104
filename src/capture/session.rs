//! Active capture session

use super::types::{CaptureRecord, RecordKind, SessionKey};
use crate::feed::{CaptureMessage, Received};
use crate::latency::{median, ClockOffset, LatencyEngine};
use crate::schedule::ArmedTrigger;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Records every message for one symbol between trigger and window end
///
/// The target, settlement and clock offset are fixed when the session
/// starts and never change afterwards.
#[derive(Debug)]
pub struct CaptureSession {
    id: Uuid,
    key: SessionKey,
    funding_rate: Decimal,
    interval_hours: u32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    started_at: DateTime<Utc>,
    offset: ClockOffset,
    records: Vec<CaptureRecord>,
    last_local_ts: Option<DateTime<Utc>>,
    clamped: u64,
    foreign: u64,
}

impl CaptureSession {
    pub fn start(trigger: &ArmedTrigger, offset: ClockOffset, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: SessionKey {
                symbol: trigger.symbol.clone(),
                settlement: trigger.settlement,
            },
            funding_rate: trigger.funding_rate,
            interval_hours: trigger.interval_hours,
            window_start: trigger.trigger_at,
            window_end: trigger.window_end,
            started_at: now,
            offset,
            records: Vec::with_capacity(4096),
            last_local_ts: None,
            clamped: 0,
            foreign: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn symbol(&self) -> &str {
        &self.key.symbol
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_end
    }

    pub fn offset(&self) -> &ClockOffset {
        &self.offset
    }

    pub fn engine(&self) -> LatencyEngine {
        LatencyEngine::new(self.offset)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CaptureRecord] {
        &self.records
    }

    /// Append a received message in arrival order
    ///
    /// Returns the appended record, or `None` for another symbol's message.
    /// A local stamp earlier than the previous one is clamped to it.
    pub fn record(&mut self, received: Received<CaptureMessage>) -> Option<&CaptureRecord> {
        if received.message.symbol() != self.key.symbol {
            self.foreign += 1;
            return None;
        }

        let mut record = CaptureRecord::from(received);
        if let Some(last) = self.last_local_ts {
            if record.local_ts < last {
                tracing::debug!(
                    symbol = %self.key.symbol,
                    step_back_us = (last - record.local_ts).num_microseconds().unwrap_or_default(),
                    "Local clock stepped backwards, clamping receipt time"
                );
                record.local_ts = last;
                self.clamped += 1;
            }
        }
        self.last_local_ts = Some(record.local_ts);
        self.records.push(record);
        self.records.last()
    }

    /// Close the session
    ///
    /// `partial` marks a session cut short before its window end.
    pub fn finish(self, now: DateTime<Utc>, partial: bool) -> CompletedSession {
        if self.foreign > 0 || self.clamped > 0 {
            tracing::debug!(
                session = %self.id,
                foreign = self.foreign,
                clamped = self.clamped,
                "Session closed with adjusted input"
            );
        }

        CompletedSession {
            id: self.id,
            key: self.key,
            funding_rate: self.funding_rate,
            interval_hours: self.interval_hours,
            window_start: self.window_start,
            window_end: self.window_end,
            started_at: self.started_at,
            ended_at: now,
            offset: self.offset,
            records: self.records,
            partial,
        }
    }
}

/// A closed session awaiting persistence
#[derive(Debug, Clone)]
pub struct CompletedSession {
    pub id: Uuid,
    pub key: SessionKey,
    pub funding_rate: Decimal,
    pub interval_hours: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub offset: ClockOffset,
    pub records: Vec<CaptureRecord>,
    pub partial: bool,
}

impl CompletedSession {
    /// Latency per record under the session's fixed offset
    pub fn latencies(&self) -> Vec<f64> {
        LatencyEngine::new(self.offset).evaluate(&self.records)
    }

    /// Local receipt times of the first and last record
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.records.first()?.local_ts, self.records.last()?.local_ts))
    }

    pub fn summary(&self) -> SessionSummary {
        let mut latencies = self.latencies();
        let peak = LatencyEngine::new(self.offset)
            .peak(&self.records)
            .map(|(i, latency)| (self.records[i].local_ts, latency));
        let quotes = self
            .records
            .iter()
            .filter(|r| r.kind() == RecordKind::Quote)
            .count();

        SessionSummary {
            records: self.records.len(),
            quotes,
            trades: self.records.len() - quotes,
            median_latency_ms: median(&mut latencies),
            peak,
        }
    }
}

/// Operator-facing session statistics
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub records: usize,
    pub quotes: usize,
    pub trades: usize,
    pub median_latency_ms: Option<f64>,
    /// Receipt time and latency of the slowest record
    pub peak: Option<(DateTime<Utc>, f64)>,
}
