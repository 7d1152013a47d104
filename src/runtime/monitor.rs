//! Settlement capture event loop
//!
//! One task owns the scheduler, the funding table, the active capture
//! session and the published clock offset. It waits on, in priority order:
//!
//! 1. the active session's quote/trade stream
//! 2. the capture window end
//! 3. the armed trigger
//! 4. background job completions
//! 5. funding updates (or the resubscribe timer after the feed ends)
//! 6. the funding report and interval refresh timers
//! 7. the shutdown signal

use super::clock::{deadline, until, Clock};
use super::worker::{BackgroundWorker, Completion};
use crate::capture::{CaptureSession, CaptureSink, RetryPolicy};
use crate::config::Config;
use crate::feed::{
    CaptureFeed, CaptureMessage, FeedEvent, FundingFeed, FundingTable, FundingTracker,
    FundingUpdate, Received,
};
use crate::latency::ClockOffsetEstimator;
use crate::market::FundingInfoSource;
use crate::schedule::{
    ArmedTrigger, Evaluation, ScheduleError, Scheduler, SchedulerConfig, SchedulerState,
};
use crate::telemetry::{
    increment_counter, record_latency, set_gauge, CounterMetric, GaugeMetric, LatencyMetric,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

type FundingEvents = mpsc::Receiver<FeedEvent<Vec<FundingUpdate>>>;
type CaptureEvents = mpsc::Receiver<FeedEvent<Received<CaptureMessage>>>;

/// Monitor tuning
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub scheduler: SchedulerConfig,
    /// Interval for symbols the lookup does not list
    pub default_interval_hours: Option<u32>,
    pub interval_refresh: Duration,
    /// Minimum spacing of lookups requested by scheduling failures
    pub interval_retry: Duration,
    pub report_interval: Duration,
    pub report_threshold: Decimal,
    pub report_min_symbols: usize,
    /// Minimum offset age before arming re-estimates it
    pub clock_min_refresh: Duration,
    /// Delay before resubscribing once the funding feed ends
    pub resubscribe_delay: Duration,
    pub retry_policy: RetryPolicy,
    pub max_background_jobs: usize,
}

impl From<&Config> for MonitorConfig {
    fn from(config: &Config) -> Self {
        let schedule = &config.schedule;
        Self {
            scheduler: SchedulerConfig::from(schedule),
            default_interval_hours: schedule.default_interval_hours,
            interval_refresh: Duration::from_secs(schedule.interval_refresh_secs),
            interval_retry: Duration::from_secs(schedule.interval_retry_secs),
            report_interval: Duration::from_secs(60),
            report_threshold: schedule.report_threshold,
            report_min_symbols: schedule.report_min_symbols,
            clock_min_refresh: Duration::from_secs(config.clock.min_refresh_secs),
            resubscribe_delay: Duration::from_millis(config.feed.initial_reconnect_ms),
            retry_policy: RetryPolicy::from(&config.capture),
            max_background_jobs: config.runtime.max_background_jobs,
        }
    }
}

/// External collaborators of the monitor
pub struct MonitorDeps {
    pub funding_feed: Arc<dyn FundingFeed>,
    pub capture_feed: Arc<dyn CaptureFeed>,
    pub funding_info: Arc<dyn FundingInfoSource>,
    pub estimator: Arc<ClockOffsetEstimator>,
    pub sink: Arc<dyn CaptureSink>,
    pub clock: Arc<dyn Clock>,
}

/// Totals reported when the monitor exits
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorStats {
    pub sessions_written: usize,
    pub sessions_failed: usize,
    pub records_captured: u64,
    pub funding_reconnects: u64,
    /// Capture logs written, in order
    pub written: Vec<PathBuf>,
}

struct ActiveCapture {
    session: CaptureSession,
    /// `None` once the stream has ended
    events: Option<CaptureEvents>,
}

#[derive(Default)]
struct LookupState {
    in_flight: bool,
    last_request: Option<Instant>,
}

pub struct Monitor {
    config: MonitorConfig,
    deps: MonitorDeps,
    scheduler: Scheduler,
    tracker: FundingTracker,
    worker: BackgroundWorker,
    completions: mpsc::Receiver<Completion>,
    state: watch::Sender<SchedulerState>,
    active: Option<ActiveCapture>,
    funding_events: Option<FundingEvents>,
    resubscribe_at: Option<Instant>,
    intervals: LookupState,
    offset_in_flight: bool,
    last_skip: Option<ScheduleError>,
    stopping: bool,
    stats: MonitorStats,
}

impl Monitor {
    pub fn new(config: MonitorConfig, deps: MonitorDeps) -> Self {
        let (worker, completions) = BackgroundWorker::new(config.max_background_jobs);
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            scheduler: Scheduler::new(config.scheduler),
            config,
            deps,
            tracker: FundingTracker::new(),
            worker,
            completions,
            state,
            active: None,
            funding_events: None,
            resubscribe_at: None,
            intervals: LookupState::default(),
            offset_in_flight: false,
            last_skip: None,
            stopping: false,
            stats: MonitorStats::default(),
        }
    }

    /// Scheduler state, published after every handled event
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn subscribe_funding(&self) -> watch::Receiver<FundingTable> {
        self.tracker.subscribe()
    }

    /// Run until `shutdown` turns true or its sender is dropped
    ///
    /// An active capture is cut short and flushed as partial before
    /// returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<MonitorStats> {
        if *shutdown.borrow_and_update() {
            return Ok(self.stats);
        }

        tracing::info!(
            lead_secs = self.config.scheduler.lead.num_seconds(),
            window_secs = self.config.scheduler.window.num_seconds(),
            "Starting settlement monitor"
        );

        self.request_offset();
        self.request_intervals(true);
        self.subscribe_funding_feed().await;

        let start = Instant::now();
        let report_every = self.config.report_interval.max(Duration::from_secs(1));
        let mut report = tokio::time::interval_at(start + report_every, report_every);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let refresh_every = self.config.interval_refresh.max(Duration::from_secs(1));
        let mut refresh = tokio::time::interval_at(start + refresh_every, refresh_every);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.stopping && self.active.is_none() && !self.flush_pending() {
                break;
            }

            let clock = Arc::clone(&self.deps.clock);
            let window_end = self
                .active
                .as_ref()
                .map(|a| deadline(clock.as_ref(), a.session.window_end()));
            let trigger = self
                .scheduler
                .trigger_at()
                .filter(|_| !self.stopping)
                .map(|at| deadline(clock.as_ref(), at));
            let resubscribe_at = self.resubscribe_at.filter(|_| !self.stopping);
            let capturing = self.active.as_ref().is_some_and(|a| a.events.is_some());
            let funding_open = self.funding_events.is_some();

            tokio::select! {
                biased;

                event = recv_opt(self.active.as_mut().and_then(|a| a.events.as_mut())), if capturing => {
                    self.on_capture_event(event);
                }
                _ = sleep_until_opt(window_end), if window_end.is_some() => {
                    self.close_session(false);
                }
                _ = sleep_until_opt(trigger), if trigger.is_some() => {
                    self.on_trigger().await;
                }
                Some(completion) = self.completions.recv() => {
                    self.on_completion(completion);
                }
                event = recv_opt(self.funding_events.as_mut()), if funding_open => {
                    self.on_funding_event(event);
                }
                _ = sleep_until_opt(resubscribe_at), if resubscribe_at.is_some() => {
                    self.resubscribe_at = None;
                    self.subscribe_funding_feed().await;
                }
                _ = report.tick() => {
                    self.report_funding();
                }
                _ = refresh.tick() => {
                    self.request_intervals(true);
                }
                changed = shutdown.changed(), if !self.stopping => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.begin_shutdown();
                    }
                }
            }

            self.publish_state();
        }

        tracing::info!(
            sessions_written = self.stats.sessions_written,
            sessions_failed = self.stats.sessions_failed,
            records = self.stats.records_captured,
            "Settlement monitor stopped"
        );
        Ok(self.stats)
    }

    fn flush_pending(&self) -> bool {
        matches!(self.scheduler.state(), SchedulerState::Flushing(_))
    }

    fn publish_state(&self) {
        let current = self.scheduler.state();
        self.state.send_if_modified(|published| {
            if published != current {
                *published = current.clone();
                true
            } else {
                false
            }
        });
    }

    async fn subscribe_funding_feed(&mut self) {
        match self.deps.funding_feed.subscribe_funding().await {
            Ok(events) => self.funding_events = Some(events),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_in_ms = self.config.resubscribe_delay.as_millis() as u64,
                    "Funding subscription failed"
                );
                self.resubscribe_at = Some(Instant::now() + self.config.resubscribe_delay);
            }
        }
    }

    fn on_funding_event(&mut self, event: Option<FeedEvent<Vec<FundingUpdate>>>) {
        match event {
            Some(FeedEvent::Data(batch)) => {
                self.tracker.apply_batch(&batch);
                self.evaluate();
            }
            Some(FeedEvent::Connected) => {
                tracing::info!(symbols = self.tracker.table().len(), "Funding stream connected");
            }
            Some(FeedEvent::Reconnecting { attempt }) => {
                tracing::warn!(
                    attempt,
                    state = self.scheduler.state().name(),
                    "Funding stream dropped, reconnecting"
                );
                self.stats.funding_reconnects += 1;
                increment_counter(CounterMetric::FeedReconnects, 1);
            }
            Some(FeedEvent::Disconnected) | None => {
                tracing::warn!(
                    retry_in_ms = self.config.resubscribe_delay.as_millis() as u64,
                    "Funding subscription ended, resubscribing"
                );
                self.funding_events = None;
                self.resubscribe_at = Some(Instant::now() + self.config.resubscribe_delay);
            }
        }
    }

    /// Re-run target selection against the current table
    fn evaluate(&mut self) {
        if self.stopping {
            return;
        }

        let now = self.deps.clock.now();
        let evaluation = {
            let table = self.tracker.table();
            self.scheduler.evaluate(&table, now)
        };

        match evaluation {
            Evaluation::Armed(armed) => {
                tracing::info!(
                    symbol = %armed.symbol,
                    funding_rate = %armed.funding_rate,
                    interval_hours = armed.interval_hours,
                    settlement = %armed.settlement,
                    trigger_at = %armed.trigger_at,
                    "Capture trigger armed"
                );
                self.on_armed(&armed, now);
            }
            Evaluation::Rearmed { previous, current } => {
                tracing::info!(
                    previous = %previous.symbol,
                    symbol = %current.symbol,
                    funding_rate = %current.funding_rate,
                    settlement = %current.settlement,
                    trigger_at = %current.trigger_at,
                    "Capture target changed, trigger re-armed"
                );
                self.on_armed(&current, now);
            }
            Evaluation::Skipped { error, cancelled } => {
                if let Some(cancelled) = cancelled {
                    tracing::info!(symbol = %cancelled.symbol, "Armed trigger cancelled");
                }
                if self.last_skip.as_ref() != Some(&error) {
                    tracing::warn!(error = %error, "Cannot schedule settlement capture");
                    increment_counter(CounterMetric::ScheduleErrors, 1);
                    self.last_skip = Some(error);
                }
                self.request_intervals(false);
            }
            Evaluation::Unchanged | Evaluation::Suspended | Evaluation::NoCandidate => {}
        }
    }

    fn on_armed(&mut self, armed: &ArmedTrigger, now: DateTime<Utc>) {
        self.last_skip = None;
        set_gauge(
            GaugeMetric::TargetFundingRate,
            armed.funding_rate.to_f64().unwrap_or_default(),
        );
        set_gauge(
            GaugeMetric::SecondsToTrigger,
            until(now, armed.trigger_at).as_secs_f64(),
        );

        let current = self.deps.estimator.current();
        if !current.is_estimated() || until(current.updated_at, now) >= self.config.clock_min_refresh {
            self.request_offset();
        }
    }

    async fn on_trigger(&mut self) {
        let now = self.deps.clock.now();
        let Some(armed) = self.scheduler.fire(now) else {
            return;
        };

        let offset = self.deps.estimator.current();
        if !offset.is_estimated() {
            tracing::warn!(symbol = %armed.symbol, "Capturing without a clock offset estimate");
        }

        tracing::info!(
            symbol = %armed.symbol,
            settlement = %armed.settlement,
            window_end = %armed.window_end,
            late_ms = (now - armed.trigger_at).num_milliseconds(),
            offset_ms = offset.offset_ms,
            "Capture started"
        );

        let session = CaptureSession::start(&armed, offset, now);
        let events = match self.deps.capture_feed.subscribe_symbol(&armed.symbol).await {
            Ok(events) => Some(events),
            Err(e) => {
                tracing::error!(
                    symbol = %armed.symbol,
                    error = %e,
                    "Capture subscription failed, session will hold no records"
                );
                None
            }
        };
        self.active = Some(ActiveCapture { session, events });
    }

    fn on_capture_event(&mut self, event: Option<FeedEvent<Received<CaptureMessage>>>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match event {
            Some(FeedEvent::Data(received)) => {
                if received.local_ts > active.session.window_end() {
                    self.close_session(false);
                    return;
                }
                let engine = active.session.engine();
                if let Some(record) = active.session.record(received) {
                    record_latency(LatencyMetric::CaptureLatency, engine.record_latency(record));
                    increment_counter(CounterMetric::CaptureRecords, 1);
                    self.stats.records_captured += 1;
                }
            }
            Some(FeedEvent::Connected) => {
                tracing::info!(symbol = %active.session.symbol(), "Capture stream connected");
            }
            Some(FeedEvent::Reconnecting { attempt }) => {
                tracing::warn!(
                    symbol = %active.session.symbol(),
                    attempt,
                    "Capture stream dropped, reconnecting"
                );
                increment_counter(CounterMetric::FeedReconnects, 1);
            }
            Some(FeedEvent::Disconnected) | None => {
                tracing::warn!(
                    symbol = %active.session.symbol(),
                    records = active.session.len(),
                    "Capture stream ended before window end"
                );
                active.events = None;
            }
        }
    }

    /// End the active session and hand it to the writer
    fn close_session(&mut self, partial: bool) {
        let Some(active) = self.active.take() else {
            return;
        };
        // Dropping the receiver closes the stream
        drop(active.events);

        let completed = active.session.finish(self.deps.clock.now(), partial);
        self.scheduler.begin_flush();

        tracing::info!(
            session = %completed.id,
            symbol = %completed.key.symbol,
            records = completed.records.len(),
            partial,
            "Capture window closed"
        );

        self.worker.flush(
            Arc::clone(&self.deps.sink),
            completed,
            self.config.retry_policy,
        );
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::ClockOffset(result) => {
                self.offset_in_flight = false;
                let offset = self.deps.estimator.publish(result);
                set_gauge(GaugeMetric::ClockOffset, offset.offset_ms);
                if offset.is_estimated() {
                    record_latency(LatencyMetric::ClockRoundTrip, offset.min_rtt_ms);
                }
            }
            Completion::FundingInfo(Ok(listed)) => {
                self.intervals.in_flight = false;
                self.tracker
                    .apply_intervals(&listed, self.config.default_interval_hours);
                tracing::info!(
                    listed = listed.len(),
                    default_hours = ?self.config.default_interval_hours,
                    "Funding intervals updated"
                );
                self.evaluate();
            }
            Completion::FundingInfo(Err(e)) => {
                self.intervals.in_flight = false;
                tracing::warn!(error = %e, "Funding interval lookup failed");
            }
            Completion::Flushed {
                key,
                summary,
                partial,
                elapsed,
                result,
            } => {
                record_latency(LatencyMetric::CaptureWrite, elapsed.as_secs_f64() * 1_000.0);
                match result {
                    Ok(path) => {
                        tracing::info!(
                            session = %key,
                            path = ?path,
                            records = summary.records,
                            quotes = summary.quotes,
                            trades = summary.trades,
                            median_latency_ms = ?summary.median_latency_ms,
                            peak_latency_ms = ?summary.peak.map(|(_, latency)| latency),
                            peak_at = ?summary.peak.map(|(at, _)| at),
                            partial,
                            "Capture log written"
                        );
                        self.stats.sessions_written += 1;
                        self.stats.written.push(path);
                        increment_counter(CounterMetric::SessionsCompleted, 1);
                        if partial {
                            increment_counter(CounterMetric::SessionsPartial, 1);
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            session = %key,
                            error = %e,
                            records = summary.records,
                            "Capture log write failed, session discarded"
                        );
                        self.stats.sessions_failed += 1;
                        increment_counter(CounterMetric::CaptureWriteFailures, 1);
                    }
                }
                self.scheduler.complete();
                self.evaluate();
            }
        }
    }

    fn request_offset(&mut self) {
        if self.offset_in_flight {
            return;
        }
        self.offset_in_flight = true;
        self.worker
            .estimate_offset(Arc::clone(&self.deps.estimator));
    }

    /// Start an interval lookup; unforced requests are throttled
    fn request_intervals(&mut self, force: bool) {
        if self.intervals.in_flight {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.intervals.last_request {
            if !force && now.duration_since(last) < self.config.interval_retry {
                return;
            }
        }

        tracing::debug!(force, "Requesting funding interval lookup");
        self.intervals.in_flight = true;
        self.intervals.last_request = Some(now);
        self.worker
            .lookup_intervals(Arc::clone(&self.deps.funding_info));
    }

    /// Log symbols funding below the report threshold
    fn report_funding(&self) {
        let table = self.tracker.table();
        set_gauge(GaugeMetric::TrackedSymbols, table.len() as f64);
        if let Some(at) = self.scheduler.trigger_at() {
            set_gauge(
                GaugeMetric::SecondsToTrigger,
                until(self.deps.clock.now(), at).as_secs_f64(),
            );
        }

        if !report_due(table.len(), self.config.report_min_symbols) {
            tracing::debug!(
                symbols = table.len(),
                required = self.config.report_min_symbols,
                "Funding table not yet populated, skipping report"
            );
            return;
        }

        let below = table.below(self.config.report_threshold);
        if below.is_empty() {
            tracing::info!(
                symbols = table.len(),
                threshold = %self.config.report_threshold,
                "No symbols below funding threshold"
            );
            return;
        }

        let rates = below
            .iter()
            .map(|e| format!("{}:{}", e.symbol, e.funding_rate))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(
            symbols = table.len(),
            below = below.len(),
            threshold = %self.config.report_threshold,
            state = self.scheduler.state().name(),
            rates = %rates,
            "Negative funding report"
        );
    }

    fn begin_shutdown(&mut self) {
        tracing::info!(state = self.scheduler.state().name(), "Shutdown requested");
        self.stopping = true;
        self.funding_events = None;
        self.resubscribe_at = None;

        if let Some(cancelled) = self.scheduler.cancel() {
            tracing::info!(symbol = %cancelled.symbol, "Armed trigger cancelled for shutdown");
        }
        if self.active.is_some() {
            tracing::info!("Ending active capture early");
            self.close_session(true);
        }
    }
}

/// The minute report waits for a table larger than `min_symbols`
fn report_due(symbols: usize, min_symbols: usize) -> bool {
    symbols > min_symbols
}

async fn recv_opt<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
