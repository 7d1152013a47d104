//! Exchange REST lookups
//!
//! Server time round trips and funding interval discovery

mod rest;

pub use rest::{BinanceRestClient, RestConfig, BINANCE_FUTURES_REST_URL};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Funding interval of one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingInfo {
    pub symbol: String,
    pub interval_hours: u32,
}

/// One timestamped server time request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTrip {
    /// Local time the request was sent
    pub send_time: DateTime<Utc>,
    /// Server time reported in the response
    pub server_time: DateTime<Utc>,
    /// Local time the response arrived
    pub receive_time: DateTime<Utc>,
}

impl RoundTrip {
    /// Round trip time in milliseconds
    pub fn rtt_ms(&self) -> f64 {
        micros_between(self.send_time, self.receive_time) as f64 / 1_000.0
    }

    /// Server clock minus local clock, assuming symmetric one-way delay
    pub fn offset_ms(&self) -> f64 {
        micros_between(self.send_time, self.server_time) as f64 / 1_000.0 - self.rtt_ms() / 2.0
    }
}

fn micros_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_microseconds().unwrap_or(i64::MAX)
}

/// Authoritative server time
#[async_trait]
pub trait ServerTimeSource: Send + Sync {
    /// Perform one timestamped request/response
    async fn round_trip(&self) -> anyhow::Result<RoundTrip>;
}

/// Funding interval lookup
#[async_trait]
pub trait FundingInfoSource: Send + Sync {
    /// Symbols with an explicitly listed funding interval
    async fn funding_info(&self) -> anyhow::Result<Vec<FundingInfo>>;
}
