//! Prometheus metrics
//!
//! Recording is a no-op until an exporter is installed.

/// Histogram metric types, values in milliseconds
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Corrected per-record feed latency during a capture
    CaptureLatency,
    /// Server time round trip
    ClockRoundTrip,
    /// Capture log write duration
    CaptureWrite,
}

impl LatencyMetric {
    pub fn name(&self) -> &'static str {
        match self {
            LatencyMetric::CaptureLatency => "settle_capture_latency_ms",
            LatencyMetric::ClockRoundTrip => "settle_clock_round_trip_ms",
            LatencyMetric::CaptureWrite => "settle_capture_write_ms",
        }
    }
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Published clock offset (server minus local)
    ClockOffset,
    /// Symbols in the funding table
    TrackedSymbols,
    /// Funding rate of the current target
    TargetFundingRate,
    /// Seconds until the armed trigger fires
    SecondsToTrigger,
}

impl GaugeMetric {
    pub fn name(&self) -> &'static str {
        match self {
            GaugeMetric::ClockOffset => "settle_clock_offset_ms",
            GaugeMetric::TrackedSymbols => "settle_tracked_symbols",
            GaugeMetric::TargetFundingRate => "settle_target_funding_rate",
            GaugeMetric::SecondsToTrigger => "settle_seconds_to_trigger",
        }
    }
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    FeedReconnects,
    CaptureRecords,
    SessionsCompleted,
    SessionsPartial,
    CaptureWriteFailures,
    ScheduleErrors,
}

impl CounterMetric {
    pub fn name(&self) -> &'static str {
        match self {
            CounterMetric::FeedReconnects => "settle_feed_reconnects_total",
            CounterMetric::CaptureRecords => "settle_capture_records_total",
            CounterMetric::SessionsCompleted => "settle_sessions_completed_total",
            CounterMetric::SessionsPartial => "settle_sessions_partial_total",
            CounterMetric::CaptureWriteFailures => "settle_capture_write_failures_total",
            CounterMetric::ScheduleErrors => "settle_schedule_errors_total",
        }
    }
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, value_ms: f64) {
    metrics::histogram!(metric.name()).record(value_ms);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

/// Increment a counter
pub fn increment_counter(metric: CounterMetric, by: u64) {
    metrics::counter!(metric.name()).increment(by);
}
