//! Market data feeds
//!
//! The funding feed keeps the funding table current; the capture feed
//! streams one symbol's quotes and trades while a session is active.

mod binance;
mod funding;
mod types;

pub use binance::BinanceFeed;
pub use funding::{FundingEntry, FundingTable, FundingTracker};
pub use types::{
    CaptureMessage, FeedEvent, FundingUpdate, QuoteUpdate, Received, TradeSide, TradeUpdate,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Source of all-market funding rate pushes
#[async_trait]
pub trait FundingFeed: Send + Sync {
    /// Subscribe to funding updates; reconnects are reported as events
    async fn subscribe_funding(
        &self,
    ) -> anyhow::Result<mpsc::Receiver<FeedEvent<Vec<FundingUpdate>>>>;
}

/// Source of per-symbol quote and trade streams
#[async_trait]
pub trait CaptureFeed: Send + Sync {
    /// Subscribe to one symbol; dropping the receiver unsubscribes
    async fn subscribe_symbol(
        &self,
        symbol: &str,
    ) -> anyhow::Result<mpsc::Receiver<FeedEvent<Received<CaptureMessage>>>>;
}
