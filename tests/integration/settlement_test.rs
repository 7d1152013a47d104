//! Target selection and trigger planning through the public API

use crate::support::at;
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settle_latency::feed::{FundingTracker, FundingUpdate};
use settle_latency::market::FundingInfo;
use settle_latency::schedule::{
    next_settlement, select_target, Evaluation, ScheduleError, Scheduler, SchedulerConfig,
};

fn update(symbol: &str, rate: Decimal) -> FundingUpdate {
    FundingUpdate {
        symbol: symbol.to_string(),
        funding_rate: rate,
        mark_price: dec!(100),
        next_funding_time: None,
        event_time: at("2024-01-01T07:59:50Z"),
    }
}

#[test]
fn test_late_target_before_settlement() {
    let tracker = FundingTracker::new();
    tracker.apply_intervals(&[], Some(8));
    tracker.apply_batch(&[
        update("BTCUSDT", dec!(-0.0008)),
        update("ETHUSDT", dec!(-0.0001)),
    ]);

    let mut scheduler = Scheduler::new(SchedulerConfig::default());
    let now = at("2024-01-01T07:59:50Z");
    let evaluation = scheduler.evaluate(&tracker.table(), now);

    let Evaluation::Armed(armed) = evaluation else {
        panic!("expected a trigger, got {:?}", evaluation);
    };
    assert_eq!(armed.symbol, "BTCUSDT");
    assert_eq!(armed.settlement, at("2024-01-01T08:00:00Z"));
    assert_eq!(armed.trigger_at, at("2024-01-01T07:59:30Z"));
    assert_eq!(armed.window_end, at("2024-01-01T08:00:30Z"));

    // Trigger time has passed, so it is due right away
    let fired = scheduler.fire(now).unwrap();
    assert_eq!(fired, armed);
}

#[test]
fn test_mixed_intervals_follow_lookup() {
    let tracker = FundingTracker::new();
    tracker.apply_batch(&[
        update("INJUSDT", dec!(-0.0030)),
        update("BTCUSDT", dec!(-0.0001)),
    ]);
    tracker.apply_intervals(
        &[FundingInfo {
            symbol: "INJUSDT".to_string(),
            interval_hours: 4,
        }],
        Some(8),
    );

    let table = tracker.table();
    let target = select_target(&table).unwrap();
    assert_eq!(target.symbol, "INJUSDT");

    let now = at("2024-01-01T01:15:00Z");
    assert_eq!(
        next_settlement(now, &target.symbol, target.interval_hours).unwrap(),
        at("2024-01-01T04:00:00Z")
    );
    let btc = table.get("BTCUSDT").unwrap();
    assert_eq!(
        next_settlement(now, &btc.symbol, btc.interval_hours).unwrap(),
        at("2024-01-01T08:00:00Z")
    );
}

#[test]
fn test_tie_resolves_to_smallest_symbol() {
    let tracker = FundingTracker::new();
    tracker.apply_intervals(&[], Some(8));
    tracker.apply_batch(&[
        update("XRPUSDT", dec!(-0.0020)),
        update("ADAUSDT", dec!(-0.0020)),
        update("DOGEUSDT", dec!(-0.0020)),
    ]);

    assert_eq!(select_target(&tracker.table()).unwrap().symbol, "ADAUSDT");
}

#[test]
fn test_missing_interval_is_reported() {
    let tracker = FundingTracker::new();
    tracker.apply_batch(&[update("BTCUSDT", dec!(-0.0008))]);

    let mut scheduler = Scheduler::new(SchedulerConfig {
        lead: Duration::seconds(30),
        window: Duration::seconds(60),
    });
    let evaluation = scheduler.evaluate(&tracker.table(), at("2024-01-01T07:00:00Z"));

    assert_eq!(
        evaluation,
        Evaluation::Skipped {
            error: ScheduleError::UnknownInterval {
                symbol: "BTCUSDT".to_string(),
            },
            cancelled: None,
        }
    );
    assert!(scheduler.trigger_at().is_none());
}
