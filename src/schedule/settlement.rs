//! Target selection and settlement time arithmetic

use super::types::{ArmedTrigger, ScheduleError};
use crate::feed::{FundingEntry, FundingTable};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Symbol with the lowest funding rate
///
/// Equal rates resolve to the lexically smallest symbol.
pub fn select_target(table: &FundingTable) -> Option<&FundingEntry> {
    table.iter().min_by(|a, b| {
        a.funding_rate
            .cmp(&b.funding_rate)
            .then_with(|| a.symbol.cmp(&b.symbol))
    })
}

/// Next funding boundary strictly after `now`
///
/// Boundaries are multiples of the interval counted from the Unix epoch,
/// which puts them on 00:00 UTC for every interval dividing 24 hours.
pub fn next_settlement(
    now: DateTime<Utc>,
    symbol: &str,
    interval_hours: Option<u32>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let hours = interval_hours.ok_or_else(|| ScheduleError::UnknownInterval {
        symbol: symbol.to_string(),
    })?;
    if hours == 0 {
        return Err(ScheduleError::InvalidInterval {
            symbol: symbol.to_string(),
            hours,
        });
    }

    let period = i64::from(hours) * 3_600;
    let next = (now.timestamp().div_euclid(period) + 1) * period;

    Utc.timestamp_opt(next, 0)
        .single()
        .ok_or(ScheduleError::InvalidInterval {
            symbol: symbol.to_string(),
            hours,
        })
}

/// Plan the capture for an entry's next settlement
///
/// The window opens `lead` before settlement and stays open for `window`.
pub fn plan_capture(
    entry: &FundingEntry,
    now: DateTime<Utc>,
    lead: Duration,
    window: Duration,
) -> Result<ArmedTrigger, ScheduleError> {
    let settlement = next_settlement(now, &entry.symbol, entry.interval_hours)?;
    let trigger_at = settlement - lead;

    Ok(ArmedTrigger {
        symbol: entry.symbol.clone(),
        funding_rate: entry.funding_rate,
        interval_hours: entry.interval_hours.unwrap_or_default(),
        settlement,
        trigger_at,
        window_end: trigger_at + window,
    })
}
