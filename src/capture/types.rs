//! Capture record and session identity types

use crate::feed::{CaptureMessage, Received, TradeSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Record kind as written to the capture log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Quote,
    Trade,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Quote => "quote",
            RecordKind::Trade => "trade",
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quote" => Ok(RecordKind::Quote),
            "trade" => Ok(RecordKind::Trade),
            other => Err(format!("unknown record kind: {}", other)),
        }
    }
}

/// Kind-specific record content
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    Quote {
        bid_price: Decimal,
        bid_qty: Decimal,
        ask_price: Decimal,
        ask_qty: Decimal,
        update_id: u64,
    },
    Trade {
        price: Decimal,
        qty: Decimal,
        side: TradeSide,
        trade_id: u64,
    },
}

/// One timestamped message captured during a session
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    /// Local receipt time
    pub local_ts: DateTime<Utc>,
    /// Exchange event time
    pub event_ts: DateTime<Utc>,
    pub payload: RecordPayload,
}

impl CaptureRecord {
    pub fn kind(&self) -> RecordKind {
        match self.payload {
            RecordPayload::Quote { .. } => RecordKind::Quote,
            RecordPayload::Trade { .. } => RecordKind::Trade,
        }
    }
}

impl From<Received<CaptureMessage>> for CaptureRecord {
    fn from(received: Received<CaptureMessage>) -> Self {
        let event_ts = received.message.event_time();
        let payload = match received.message {
            CaptureMessage::Quote(q) => RecordPayload::Quote {
                bid_price: q.bid_price,
                bid_qty: q.bid_qty,
                ask_price: q.ask_price,
                ask_qty: q.ask_qty,
                update_id: q.update_id,
            },
            CaptureMessage::Trade(t) => RecordPayload::Trade {
                price: t.price,
                qty: t.qty,
                side: t.side,
                trade_id: t.trade_id,
            },
        };

        Self {
            local_ts: received.local_ts,
            event_ts,
            payload,
        }
    }
}

/// Identifies a capture by target and settlement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub symbol: String,
    pub settlement: DateTime<Utc>,
}

impl SessionKey {
    /// Capture log file name without extension
    pub fn file_stem(&self) -> String {
        format!(
            "capture_{}_{}",
            self.symbol,
            self.settlement.format("%Y%m%d_%H%M%S")
        )
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.settlement.to_rfc3339())
    }
}

/// Capture log persistence errors
#[derive(Debug, Clone, Error)]
pub enum CaptureIoError {
    /// Every write attempt failed
    #[error("capture log {} not written after {attempts} attempts: {message}", .path.display())]
    RetriesExhausted {
        path: PathBuf,
        attempts: u32,
        message: String,
    },
    /// Write task could not run to completion
    #[error("capture writer unavailable: {0}")]
    WorkerUnavailable(String),
}
