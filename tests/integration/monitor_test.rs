//! Monitor scenarios under paused time

use crate::support::{at, FakeFundingInfo, Harness, RecordingSink};
use rust_decimal_macros::dec;
use settle_latency::feed::FeedEvent;
use settle_latency::runtime::Clock;
use settle_latency::schedule::SchedulerState;
use std::path::PathBuf;
use std::time::Duration;

fn is_armed(state: &SchedulerState) -> bool {
    matches!(state, SchedulerState::Armed(_))
}

fn is_capturing(state: &SchedulerState) -> bool {
    matches!(state, SchedulerState::Capturing(_))
}

#[tokio::test(start_paused = true)]
async fn test_captures_window_around_settlement() {
    let mut harness = Harness::start(at("2024-01-01T07:59:00Z")).await;
    harness
        .push_rates(&[("BTCUSDT", dec!(-0.0008)), ("ETHUSDT", dec!(-0.0001))])
        .await;

    let armed = harness.wait_for_state(is_armed).await;
    let trigger = armed.trigger().unwrap();
    assert_eq!(trigger.symbol, "BTCUSDT");
    assert_eq!(trigger.funding_rate, dec!(-0.0008));
    assert_eq!(trigger.settlement, at("2024-01-01T08:00:00Z"));
    assert_eq!(trigger.trigger_at, at("2024-01-01T07:59:30Z"));

    harness.wait_for_state(is_capturing).await;
    assert!(harness.clock.now() >= at("2024-01-01T07:59:30Z"));
    assert!(harness.clock.now() < at("2024-01-01T07:59:31Z"));
    assert_eq!(harness.capture.symbols(), vec!["BTCUSDT".to_string()]);

    // After the flush the next 8h boundary is armed
    let next_settlement = at("2024-01-01T16:00:00Z");
    harness
        .wait_for_state(|s| matches!(s, SchedulerState::Armed(t) if t.settlement == next_settlement))
        .await;

    let sessions = harness.sink.sessions();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.key.symbol, "BTCUSDT");
    assert!(!session.partial);
    assert_eq!(session.window_start, at("2024-01-01T07:59:30Z"));
    assert_eq!(session.window_end, at("2024-01-01T08:00:30Z"));
    assert_eq!(session.offset.offset_ms, -2.0);

    let (first, last) = session.span().unwrap();
    let span_ms = (last - first).num_milliseconds();
    assert!((58_000..=62_000).contains(&span_ms), "span {} ms", span_ms);
    assert!((590..=602).contains(&session.records.len()));
    assert!(session.records.iter().all(|r| r.local_ts <= session.window_end));

    // 5 ms transport lag, local clock 2 ms ahead of the server
    assert!(session.latencies().iter().all(|&l| l == 3.0));

    let summary = session.summary();
    assert!(summary.trades > 0);
    assert_eq!(summary.quotes + summary.trades, summary.records);

    let stats = harness.shutdown().await;
    assert_eq!(stats.sessions_written, 1);
    assert_eq!(stats.sessions_failed, 0);
    assert_eq!(
        stats.written,
        vec![PathBuf::from(
            "/captures/capture_BTCUSDT_20240101_080000.parquet"
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_capture_stream_closed_after_window() {
    let mut harness = Harness::start(at("2024-01-01T07:59:25Z")).await;
    harness.push_rates(&[("BTCUSDT", dec!(-0.0008))]).await;

    harness.wait_for_state(is_capturing).await;
    harness
        .wait_for_state(|s| !matches!(s, SchedulerState::Capturing(_)))
        .await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.capture.closed(), 1);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_start_fires_immediately() {
    let mut harness = Harness::start(at("2024-01-01T07:59:50Z")).await;
    harness.push_rates(&[("BTCUSDT", dec!(-0.0008))]).await;

    let capturing = harness.wait_for_state(is_capturing).await;
    let trigger = capturing.trigger().unwrap();
    assert_eq!(trigger.settlement, at("2024-01-01T08:00:00Z"));
    assert!(harness.clock.now() < at("2024-01-01T07:59:51Z"));

    harness
        .wait_for_state(|s| !matches!(s, SchedulerState::Capturing(_)))
        .await;
    let sink = harness.sink.clone();
    let stats = harness.shutdown().await;
    assert_eq!(stats.sessions_written, 1);

    let session = &sink.sessions()[0];
    // The window keeps its scheduled bounds; only the tail is captured
    assert_eq!(session.window_start, at("2024-01-01T07:59:30Z"));
    let (first, last) = session.span().unwrap();
    assert!(first >= at("2024-01-01T07:59:50Z"));
    let span_ms = (last - first).num_milliseconds();
    assert!((38_000..=41_000).contains(&span_ms), "span {} ms", span_ms);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_while_armed_keeps_trigger() {
    let mut harness = Harness::start(at("2024-01-01T07:58:00Z")).await;
    harness
        .push_rates(&[("BTCUSDT", dec!(-0.0008)), ("ETHUSDT", dec!(-0.0001))])
        .await;
    let armed = harness.wait_for_state(is_armed).await;

    harness
        .funding
        .push(FeedEvent::Reconnecting { attempt: 1 })
        .await;
    harness.funding.push(FeedEvent::Connected).await;
    harness.funding.push(FeedEvent::Disconnected).await;

    // The monitor resubscribes after the reconnect delay
    harness.funding.wait_subscribed(2).await;
    assert_eq!(*harness.state.borrow(), armed);

    harness
        .push_rates(&[("BTCUSDT", dec!(-0.0009)), ("ETHUSDT", dec!(-0.0001))])
        .await;
    harness.wait_for_state(is_capturing).await;

    let trigger = harness.state.borrow().trigger().cloned().unwrap();
    assert_eq!(trigger.symbol, "BTCUSDT");
    assert_eq!(trigger.trigger_at, armed.trigger().unwrap().trigger_at);
    // The refreshed rate is carried into the capture
    assert_eq!(trigger.funding_rate, dec!(-0.0009));

    let stats = harness.shutdown().await;
    assert_eq!(stats.funding_reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_funding_update_during_capture_does_not_retarget() {
    let mut harness = Harness::start(at("2024-01-01T07:59:20Z")).await;
    harness
        .push_rates(&[("BTCUSDT", dec!(-0.0008)), ("ETHUSDT", dec!(-0.0001))])
        .await;
    harness.wait_for_state(is_capturing).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    harness.push_rates(&[("SOLUSDT", dec!(-0.0100))]).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let state = harness.state.borrow().clone();
    assert!(is_capturing(&state));
    assert_eq!(state.trigger().unwrap().symbol, "BTCUSDT");

    // Once the flush completes the new minimum is armed
    let next = harness
        .wait_for_state(|s| matches!(s, SchedulerState::Armed(t) if t.symbol == "SOLUSDT"))
        .await;
    assert_eq!(next.trigger().unwrap().settlement, at("2024-01-01T16:00:00Z"));

    let sessions = harness.sink.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].key.symbol, "BTCUSDT");
    assert!(!sessions[0].partial);
    assert_eq!(harness.capture.symbols(), vec!["BTCUSDT".to_string()]);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_capture_flushes_partial_session() {
    let mut harness = Harness::start(at("2024-01-01T07:59:25Z")).await;
    harness.push_rates(&[("BTCUSDT", dec!(-0.0008))]).await;
    harness.wait_for_state(is_capturing).await;

    tokio::time::sleep(Duration::from_secs(15)).await;
    let sink = harness.sink.clone();
    let stats = harness.shutdown().await;

    assert_eq!(stats.sessions_written, 1);
    let sessions = sink.sessions();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert!(session.partial);
    assert!(session.ended_at < session.window_end);
    assert!((140..=160).contains(&session.records.len()));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_armed_cancels_trigger() {
    let mut harness = Harness::start(at("2024-01-01T07:50:00Z")).await;
    harness.push_rates(&[("BTCUSDT", dec!(-0.0008))]).await;
    harness.wait_for_state(is_armed).await;

    let sink = harness.sink.clone();
    let capture = harness.capture.clone();
    let stats = harness.shutdown().await;

    assert_eq!(stats.sessions_written, 0);
    assert!(sink.sessions().is_empty());
    assert!(capture.symbols().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_interval_lookup_leaves_monitor_idle() {
    let harness = Harness::start_with(at("2024-01-01T07:59:00Z"), FakeFundingInfo::failing()).await;

    for _ in 0..14 {
        harness.push_rates(&[("BTCUSDT", dec!(-0.0008))]).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    assert_eq!(*harness.state.borrow(), SchedulerState::Idle);
    // Startup lookup plus throttled retries, 30 s apart
    let calls = harness.intervals.calls();
    assert!((2..=4).contains(&calls), "{} lookups", calls);
    assert!(harness.capture.symbols().is_empty());

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_discards_session_and_rearms() {
    let mut harness = Harness::start_wired(
        at("2024-01-01T07:59:00Z"),
        FakeFundingInfo::listing_nothing(),
        RecordingSink::failing(),
    )
    .await;
    harness.push_rates(&[("BTCUSDT", dec!(-0.0008))]).await;

    harness.wait_for_state(is_capturing).await;

    // The failed session is dropped and the next boundary armed
    let next_settlement = at("2024-01-01T16:00:00Z");
    let next = harness
        .wait_for_state(|s| matches!(s, SchedulerState::Armed(t) if t.settlement == next_settlement))
        .await;
    assert_eq!(next.trigger().unwrap().symbol, "BTCUSDT");

    let sink = harness.sink.clone();
    let stats = harness.shutdown().await;
    assert_eq!(stats.sessions_failed, 1);
    assert_eq!(stats.sessions_written, 0);
    assert!(stats.written.is_empty());
    // First attempt plus three retries
    assert_eq!(sink.attempts(), 4);
    assert!(sink.sessions().is_empty());
}
