//! Scheduling types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Reasons a settlement cannot be scheduled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Funding interval has not been looked up yet
    #[error("funding interval unknown for {symbol}")]
    UnknownInterval { symbol: String },
    /// Funding interval is zero
    #[error("invalid funding interval for {symbol}: {hours}h")]
    InvalidInterval { symbol: String, hours: u32 },
}

impl ScheduleError {
    pub fn symbol(&self) -> &str {
        match self {
            ScheduleError::UnknownInterval { symbol } => symbol,
            ScheduleError::InvalidInterval { symbol, .. } => symbol,
        }
    }
}

/// A capture planned around one settlement
#[derive(Debug, Clone, PartialEq)]
pub struct ArmedTrigger {
    pub symbol: String,
    /// Funding rate when the trigger was (re-)armed
    pub funding_rate: Decimal,
    pub interval_hours: u32,
    pub settlement: DateTime<Utc>,
    /// Capture start
    pub trigger_at: DateTime<Utc>,
    /// Capture end
    pub window_end: DateTime<Utc>,
}

impl ArmedTrigger {
    /// Same symbol and settlement; the rate may have moved
    pub fn targets_same(&self, other: &ArmedTrigger) -> bool {
        self.symbol == other.symbol && self.settlement == other.settlement
    }
}

/// Process-wide capture lifecycle
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Armed(ArmedTrigger),
    Capturing(ArmedTrigger),
    Flushing(ArmedTrigger),
}

impl SchedulerState {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Armed(_) => "armed",
            SchedulerState::Capturing(_) => "capturing",
            SchedulerState::Flushing(_) => "flushing",
        }
    }

    pub fn trigger(&self) -> Option<&ArmedTrigger> {
        match self {
            SchedulerState::Idle => None,
            SchedulerState::Armed(t)
            | SchedulerState::Capturing(t)
            | SchedulerState::Flushing(t) => Some(t),
        }
    }
}

/// Outcome of re-evaluating the target on a funding update
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Idle → armed
    Armed(ArmedTrigger),
    /// Prior trigger cancelled and replaced
    Rearmed {
        previous: ArmedTrigger,
        current: ArmedTrigger,
    },
    /// Armed trigger kept
    Unchanged,
    /// Capture or flush in progress
    Suspended,
    /// Funding table is empty
    NoCandidate,
    /// Target could not be scheduled; any prior trigger was cancelled
    Skipped {
        error: ScheduleError,
        cancelled: Option<ArmedTrigger>,
    },
}
