//! Capture sessions persisted to disk and analysed from the log

use crate::support::at;
use chrono::Duration;
use rust_decimal_macros::dec;
use settle_latency::capture::{
    write_with_retries, CaptureLogReader, CaptureLogWriter, CaptureSession, RecordKind,
    RetryPolicy,
};
use settle_latency::feed::{CaptureMessage, QuoteUpdate, Received, TradeSide, TradeUpdate};
use settle_latency::latency::{ClockOffset, LatencyEngine};
use settle_latency::schedule::ArmedTrigger;

fn trigger() -> ArmedTrigger {
    ArmedTrigger {
        symbol: "ETHUSDT".to_string(),
        funding_rate: dec!(-0.0012),
        interval_hours: 8,
        settlement: at("2024-03-05T16:00:00Z"),
        trigger_at: at("2024-03-05T15:59:30Z"),
        window_end: at("2024-03-05T16:00:30Z"),
    }
}

fn offset() -> ClockOffset {
    ClockOffset {
        offset_ms: 4.0,
        samples: 20,
        min_rtt_ms: 2.5,
        updated_at: at("2024-03-05T15:59:00Z"),
    }
}

/// Quotes every second; lag rises towards settlement and falls after
fn session() -> CaptureSession {
    let trigger = trigger();
    let mut session = CaptureSession::start(&trigger, offset(), trigger.trigger_at);

    for i in 0..60i64 {
        let local_ts = trigger.trigger_at + Duration::seconds(i);
        let lag_ms = 30 - (i - 30).abs();
        let event_time = local_ts - Duration::milliseconds(lag_ms);
        let message = if i % 10 == 0 {
            CaptureMessage::Trade(TradeUpdate {
                symbol: "ETHUSDT".to_string(),
                trade_id: i as u64,
                price: dec!(3500.25),
                qty: dec!(1.5),
                side: TradeSide::Sell,
                event_time,
                trade_time: event_time,
            })
        } else {
            CaptureMessage::Quote(QuoteUpdate {
                symbol: "ETHUSDT".to_string(),
                update_id: i as u64,
                bid_price: dec!(3500.24),
                bid_qty: dec!(10),
                ask_price: dec!(3500.25),
                ask_qty: dec!(4),
                event_time,
            })
        };
        session.record(Received { local_ts, message });
    }
    session
}

#[test]
fn test_session_log_supports_offline_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let writer = CaptureLogWriter::new(dir.path().join("captures"));

    let completed = session().finish(at("2024-03-05T16:00:30Z"), false);
    let path = write_with_retries(&writer, &completed, RetryPolicy::default()).unwrap();
    assert!(path.ends_with("capture_ETHUSDT_20240305_160000.parquet"));

    let log = CaptureLogReader::new(path).read().unwrap();
    assert_eq!(log.records.len(), 60);
    assert_eq!(
        log.records.iter().filter(|r| r.kind() == RecordKind::Trade).count(),
        6
    );
    assert_eq!(log.metadata["symbol"], "ETHUSDT");
    assert_eq!(log.metadata["clock_offset_ms"], "4");
    assert_eq!(log.metadata["partial"], "false");

    // Local clock 4 ms behind: corrected latency is raw lag plus 4 ms
    let engine = LatencyEngine::new(offset());
    let (index, peak) = engine.peak(&log.records).unwrap();
    assert_eq!(log.records[index].local_ts, at("2024-03-05T16:00:00Z"));
    assert_eq!(peak, 34.0);
    assert_eq!(engine.evaluate(&log.records), log.latencies);
}

#[test]
fn test_each_settlement_gets_its_own_log() {
    let dir = tempfile::tempdir().unwrap();
    let writer = CaptureLogWriter::new(dir.path().to_path_buf());

    let first = session().finish(at("2024-03-05T16:00:30Z"), false);
    let mut later = trigger();
    later.settlement = at("2024-03-06T00:00:00Z");
    later.trigger_at = at("2024-03-05T23:59:30Z");
    later.window_end = at("2024-03-06T00:00:30Z");
    let second = CaptureSession::start(&later, offset(), later.trigger_at)
        .finish(at("2024-03-05T23:59:40Z"), true);

    let a = writer.write(&first).unwrap();
    let b = writer.write(&second).unwrap();
    assert_ne!(a, b);

    let log = CaptureLogReader::new(b).read().unwrap();
    assert!(log.records.is_empty());
    assert_eq!(log.metadata["partial"], "true");
    assert_eq!(log.metadata["settlement"], "2024-03-06T00:00:00.000000Z");
}
