//! Fakes and a harness for driving the monitor under paused time

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settle_latency::capture::{CaptureSink, CompletedSession};
use settle_latency::config::Config;
use settle_latency::feed::{
    CaptureFeed, CaptureMessage, FeedEvent, FundingFeed, FundingUpdate, QuoteUpdate, Received,
    TradeSide, TradeUpdate,
};
use settle_latency::latency::{ClockOffsetEstimator, EstimatorConfig};
use settle_latency::market::{FundingInfo, FundingInfoSource, RoundTrip, ServerTimeSource};
use settle_latency::runtime::{Clock, Monitor, MonitorConfig, MonitorDeps, MonitorStats};
use settle_latency::schedule::SchedulerState;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// Wall clock that follows tokio's (paused) clock from a fixed origin
pub struct PausedClock {
    origin_wall: DateTime<Utc>,
    origin: Instant,
}

impl PausedClock {
    pub fn new(origin_wall: DateTime<Utc>) -> Self {
        Self {
            origin_wall,
            origin: Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        self.origin_wall + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }
}

/// Funding feed driven by the test
#[derive(Default)]
pub struct FakeFundingFeed {
    senders: Mutex<Vec<mpsc::Sender<FeedEvent<Vec<FundingUpdate>>>>>,
}

impl FakeFundingFeed {
    pub fn subscriptions(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    pub async fn wait_subscribed(&self, count: usize) {
        while self.subscriptions() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub async fn push(&self, event: FeedEvent<Vec<FundingUpdate>>) {
        let tx = self.senders.lock().unwrap().last().cloned().unwrap();
        tx.send(event).await.unwrap();
    }
}

#[async_trait]
impl FundingFeed for FakeFundingFeed {
    async fn subscribe_funding(
        &self,
    ) -> anyhow::Result<mpsc::Receiver<FeedEvent<Vec<FundingUpdate>>>> {
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().unwrap().push(tx);
        Ok(rx)
    }
}

/// Streams a quote every 100 ms (every fifth message a trade) until the
/// subscriber goes away; exchange event times lag receipt by 5 ms
pub struct FakeCaptureFeed {
    clock: Arc<PausedClock>,
    symbols: Mutex<Vec<String>>,
    closed: Arc<AtomicUsize>,
}

impl FakeCaptureFeed {
    pub fn new(clock: Arc<PausedClock>) -> Self {
        Self {
            clock,
            symbols: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.lock().unwrap().clone()
    }

    /// Streams whose subscriber has gone away
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureFeed for FakeCaptureFeed {
    async fn subscribe_symbol(
        &self,
        symbol: &str,
    ) -> anyhow::Result<mpsc::Receiver<FeedEvent<Received<CaptureMessage>>>> {
        self.symbols.lock().unwrap().push(symbol.to_string());

        let (tx, rx) = mpsc::channel(4096);
        let clock = Arc::clone(&self.clock);
        let closed = Arc::clone(&self.closed);
        let symbol = symbol.to_string();

        tokio::spawn(async move {
            let _ = tx.send(FeedEvent::Connected).await;
            let mut n: u64 = 0;
            loop {
                let local_ts = clock.now();
                let event_time = local_ts - chrono::Duration::milliseconds(5);
                let message = if n % 5 == 4 {
                    CaptureMessage::Trade(TradeUpdate {
                        symbol: symbol.clone(),
                        trade_id: n,
                        price: dec!(42000),
                        qty: dec!(0.01),
                        side: TradeSide::Buy,
                        event_time,
                        trade_time: event_time,
                    })
                } else {
                    CaptureMessage::Quote(QuoteUpdate {
                        symbol: symbol.clone(),
                        update_id: n,
                        bid_price: dec!(41999.9),
                        bid_qty: dec!(2),
                        ask_price: dec!(42000),
                        ask_qty: dec!(1),
                        event_time,
                    })
                };
                let event = FeedEvent::Data(Received { local_ts, message });
                if tx.send(event).await.is_err() {
                    break;
                }
                n += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            closed.fetch_add(1, Ordering::SeqCst);
        });

        Ok(rx)
    }
}

/// Server clock 2 ms behind local, 4 ms round trips
pub struct FakeServerTime {
    clock: Arc<PausedClock>,
}

#[async_trait]
impl ServerTimeSource for FakeServerTime {
    async fn round_trip(&self) -> anyhow::Result<RoundTrip> {
        let send_time = self.clock.now();
        Ok(RoundTrip {
            send_time,
            server_time: send_time,
            receive_time: send_time + chrono::Duration::milliseconds(4),
        })
    }
}

/// Interval lookup that lists nothing, or always fails
pub struct FakeFundingInfo {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeFundingInfo {
    pub fn listing_nothing() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FundingInfoSource for FakeFundingInfo {
    async fn funding_info(&self) -> anyhow::Result<Vec<FundingInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("HTTP 503 Service Unavailable");
        }
        Ok(Vec::new())
    }
}

/// Keeps completed sessions in memory, or fails every write
#[derive(Default)]
pub struct RecordingSink {
    fail: bool,
    attempts: AtomicUsize,
    sessions: Mutex<Vec<CompletedSession>>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sessions(&self) -> Vec<CompletedSession> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl CaptureSink for RecordingSink {
    fn write(&self, session: &CompletedSession) -> anyhow::Result<PathBuf> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("No space left on device");
        }
        self.sessions.lock().unwrap().push(session.clone());
        Ok(self.target(session))
    }

    fn target(&self, session: &CompletedSession) -> PathBuf {
        PathBuf::from(format!("/captures/{}.parquet", session.key.file_stem()))
    }
}

/// A running monitor wired to fakes
pub struct Harness {
    pub clock: Arc<PausedClock>,
    pub funding: Arc<FakeFundingFeed>,
    pub capture: Arc<FakeCaptureFeed>,
    pub intervals: Arc<FakeFundingInfo>,
    pub sink: Arc<RecordingSink>,
    pub state: watch::Receiver<SchedulerState>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<anyhow::Result<MonitorStats>>,
}

impl Harness {
    pub async fn start(origin: DateTime<Utc>) -> Self {
        Self::start_with(origin, FakeFundingInfo::listing_nothing()).await
    }

    pub async fn start_with(origin: DateTime<Utc>, intervals: FakeFundingInfo) -> Self {
        Self::start_wired(origin, intervals, RecordingSink::default()).await
    }

    pub async fn start_wired(
        origin: DateTime<Utc>,
        intervals: FakeFundingInfo,
        sink: RecordingSink,
    ) -> Self {
        let clock = Arc::new(PausedClock::new(origin));
        let funding = Arc::new(FakeFundingFeed::default());
        let capture = Arc::new(FakeCaptureFeed::new(Arc::clone(&clock)));
        let intervals = Arc::new(intervals);
        let sink = Arc::new(sink);
        let estimator = Arc::new(ClockOffsetEstimator::new(
            Arc::new(FakeServerTime {
                clock: Arc::clone(&clock),
            }),
            EstimatorConfig {
                samples: 5,
                spacing: Duration::ZERO,
                warmup: false,
            },
        ));

        let config = MonitorConfig::from(&Config::bundled().unwrap());
        let monitor = Monitor::new(
            config,
            MonitorDeps {
                funding_feed: funding.clone(),
                capture_feed: capture.clone(),
                funding_info: intervals.clone(),
                estimator,
                sink: sink.clone(),
                clock: clock.clone(),
            },
        );
        let state = monitor.subscribe_state();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(shutdown_rx));

        funding.wait_subscribed(1).await;

        Self {
            clock,
            funding,
            capture,
            intervals,
            sink,
            state,
            shutdown,
            handle,
        }
    }

    pub async fn push_rates(&self, rates: &[(&str, Decimal)]) {
        let now = self.clock.now();
        let batch = rates
            .iter()
            .map(|(symbol, rate)| FundingUpdate {
                symbol: symbol.to_string(),
                funding_rate: *rate,
                mark_price: dec!(100),
                next_funding_time: None,
                event_time: now,
            })
            .collect();
        self.funding.push(FeedEvent::Data(batch)).await;
    }

    pub async fn wait_for_state(
        &mut self,
        mut predicate: impl FnMut(&SchedulerState) -> bool,
    ) -> SchedulerState {
        let state = tokio::time::timeout(
            Duration::from_secs(24 * 3600),
            self.state.wait_for(|s| predicate(s)),
        )
        .await
        .expect("timed out waiting for scheduler state")
        .expect("monitor stopped");
        state.clone()
    }

    pub async fn shutdown(self) -> MonitorStats {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap().unwrap()
    }
}
