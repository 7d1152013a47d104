//! Feed message types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Funding rate push for one symbol, from the mark price stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingUpdate {
    /// Trading symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Current funding rate
    pub funding_rate: Decimal,
    pub mark_price: Decimal,
    /// Exchange-reported next funding time
    pub next_funding_time: Option<DateTime<Utc>>,
    /// Exchange event time
    pub event_time: DateTime<Utc>,
}

/// Best bid/ask update (book ticker)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub symbol: String,
    /// Order book update id
    pub update_id: u64,
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
    /// Exchange event time
    pub event_time: DateTime<Utc>,
}

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Derive the aggressor from Binance's buyer-is-maker flag
    pub fn from_buyer_maker(buyer_is_maker: bool) -> Self {
        if buyer_is_maker {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl std::str::FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade side: {}", other)),
        }
    }
}

/// Aggregate trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub symbol: String,
    /// Aggregate trade id
    pub trade_id: u64,
    pub price: Decimal,
    pub qty: Decimal,
    pub side: TradeSide,
    /// Exchange event time
    pub event_time: DateTime<Utc>,
    /// Matching engine trade time
    pub trade_time: DateTime<Utc>,
}

/// A per-symbol market data message captured during a session
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureMessage {
    Quote(QuoteUpdate),
    Trade(TradeUpdate),
}

impl CaptureMessage {
    pub fn symbol(&self) -> &str {
        match self {
            CaptureMessage::Quote(q) => &q.symbol,
            CaptureMessage::Trade(t) => &t.symbol,
        }
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        match self {
            CaptureMessage::Quote(q) => q.event_time,
            CaptureMessage::Trade(t) => t.event_time,
        }
    }
}

/// A message stamped with its local receipt time
#[derive(Debug, Clone, PartialEq)]
pub struct Received<T> {
    /// Local wall-clock time the message was read off the socket
    pub local_ts: DateTime<Utc>,
    pub message: T,
}

/// Events delivered by a feed subscription
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<T> {
    /// Decoded payload
    Data(T),
    /// Connection (re-)established
    Connected,
    /// Connection dropped, reconnect attempt scheduled
    Reconnecting { attempt: u32 },
    /// Feed gave up; the subscription ends after this
    Disconnected,
}
