//! Binance USDⓈ-M futures stream feed implementation

use super::{CaptureFeed, FundingFeed};
use super::types::{
    CaptureMessage, FeedEvent, FundingUpdate, QuoteUpdate, Received, TradeSide, TradeUpdate,
};
use crate::config::FeedConfig;
use crate::ws::{Backoff, WsClient, WsConfig, WsFrame};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;

/// Binance futures WebSocket base URL
const BINANCE_FUTURES_WS_URL: &str = "wss://fstream.binance.com";

/// All-market mark price stream, pushed every second
const MARK_PRICE_STREAM: &str = "!markPrice@arr@1s";

/// Mark price update, one element of the all-market array
#[derive(Debug, Deserialize)]
struct MarkPriceMessage {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: String,
    #[serde(rename = "r")]
    funding_rate: String,
    /// Next funding time (milliseconds)
    #[serde(rename = "T")]
    next_funding_time: i64,
}

/// Book ticker message
#[derive(Debug, Deserialize)]
struct BookTickerMessage {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "u")]
    update_id: u64,
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid_price: String,
    #[serde(rename = "B")]
    bid_qty: String,
    #[serde(rename = "a")]
    ask_price: String,
    #[serde(rename = "A")]
    ask_qty: String,
}

/// Aggregate trade message
#[derive(Debug, Deserialize)]
struct AggTradeMessage {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "a")]
    agg_trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

/// Combined stream envelope
#[derive(Debug, Deserialize)]
struct CombinedMessage {
    #[allow(dead_code)]
    stream: String,
    data: serde_json::Value,
}

fn millis(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts).single()
}

/// Binance futures feed for the funding table and per-symbol capture streams
pub struct BinanceFeed {
    base_url: String,
    max_reconnects: u32,
    backoff: Backoff,
}

impl BinanceFeed {
    /// Create a feed against the production endpoint
    pub fn new() -> Self {
        Self {
            base_url: BINANCE_FUTURES_WS_URL.to_string(),
            max_reconnects: 0,
            backoff: Backoff::default(),
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            base_url: config.ws_url.trim_end_matches('/').to_string(),
            max_reconnects: config.max_reconnects,
            backoff: Backoff {
                initial: Duration::from_millis(config.initial_reconnect_ms),
                max: Duration::from_secs(config.max_reconnect_secs),
            },
        }
    }

    /// URL of the all-market mark price stream
    fn funding_url(&self) -> String {
        format!("{}/ws/{}", self.base_url, MARK_PRICE_STREAM)
    }

    /// Combined stream URL for one symbol's book ticker and aggregate trades
    fn capture_url(&self, symbol: &str) -> String {
        let symbol = symbol.to_lowercase();
        format!(
            "{}/stream?streams={}@bookTicker/{}@aggTrade",
            self.base_url, symbol, symbol
        )
    }

    fn ws_config(&self, url: String) -> WsConfig {
        WsConfig::new(url)
            .max_reconnects(self.max_reconnects)
            .backoff(self.backoff)
            .ping_interval(Duration::from_secs(30))
    }

    /// Parse a mark price array into funding updates
    ///
    /// Elements that fail to parse are skipped.
    fn parse_mark_prices(msg: &str) -> Option<Vec<FundingUpdate>> {
        let entries: Vec<MarkPriceMessage> = serde_json::from_str(msg).ok()?;

        let updates = entries
            .into_iter()
            .filter(|m| m.event_type == "markPriceUpdate")
            .filter_map(|m| {
                Some(FundingUpdate {
                    funding_rate: Decimal::from_str(&m.funding_rate).ok()?,
                    mark_price: Decimal::from_str(&m.mark_price).ok()?,
                    next_funding_time: millis(m.next_funding_time).filter(|_| m.next_funding_time > 0),
                    event_time: millis(m.event_time)?,
                    symbol: m.symbol,
                })
            })
            .collect();

        Some(updates)
    }

    /// Parse a combined-stream capture message
    fn parse_capture_message(msg: &str) -> Option<CaptureMessage> {
        let combined: CombinedMessage = serde_json::from_str(msg).ok()?;
        let event_type = combined.data.get("e")?.as_str()?;

        match event_type {
            "bookTicker" => {
                let quote: BookTickerMessage = serde_json::from_value(combined.data).ok()?;
                Self::quote_from(quote).map(CaptureMessage::Quote)
            }
            "aggTrade" => {
                let trade: AggTradeMessage = serde_json::from_value(combined.data).ok()?;
                Self::trade_from(trade).map(CaptureMessage::Trade)
            }
            _ => None,
        }
    }

    fn quote_from(m: BookTickerMessage) -> Option<QuoteUpdate> {
        if m.event_type != "bookTicker" {
            return None;
        }
        Some(QuoteUpdate {
            update_id: m.update_id,
            bid_price: Decimal::from_str(&m.bid_price).ok()?,
            bid_qty: Decimal::from_str(&m.bid_qty).ok()?,
            ask_price: Decimal::from_str(&m.ask_price).ok()?,
            ask_qty: Decimal::from_str(&m.ask_qty).ok()?,
            event_time: millis(m.event_time)?,
            symbol: m.symbol,
        })
    }

    fn trade_from(m: AggTradeMessage) -> Option<TradeUpdate> {
        if m.event_type != "aggTrade" {
            return None;
        }
        Some(TradeUpdate {
            trade_id: m.agg_trade_id,
            price: Decimal::from_str(&m.price).ok()?,
            qty: Decimal::from_str(&m.quantity).ok()?,
            side: TradeSide::from_buyer_maker(m.buyer_is_maker),
            event_time: millis(m.event_time)?,
            trade_time: millis(m.trade_time)?,
            symbol: m.symbol,
        })
    }

    /// Forward WebSocket messages as feed events, decoding text with `parse`
    ///
    /// `parse` receives the local receipt time the stream client stamped on
    /// the frame.
    async fn run_message_loop<T, F>(
        mut ws_rx: mpsc::Receiver<WsFrame>,
        event_tx: mpsc::Sender<FeedEvent<T>>,
        parse: F,
    ) where
        F: Fn(&str, DateTime<Utc>) -> Option<T>,
    {
        loop {
            let msg = tokio::select! {
                msg = ws_rx.recv() => msg,
                _ = event_tx.closed() => {
                    tracing::debug!("Feed receiver dropped, stopping feed");
                    break;
                }
            };
            let Some(msg) = msg else { break };

            let event = match msg {
                WsFrame::Text { text, received_at } => {
                    match parse(&text, received_at) {
                        Some(data) => FeedEvent::Data(data),
                        None => {
                            tracing::trace!(len = text.len(), "Ignoring unparsed feed message");
                            continue;
                        }
                    }
                }
                WsFrame::Connected => FeedEvent::Connected,
                WsFrame::Reconnecting { attempt, .. } => FeedEvent::Reconnecting { attempt },
                WsFrame::GaveUp => FeedEvent::Disconnected,
            };

            let terminal = matches!(event, FeedEvent::Disconnected);
            if event_tx.send(event).await.is_err() || terminal {
                break;
            }
        }
    }
}

impl Default for BinanceFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FundingFeed for BinanceFeed {
    async fn subscribe_funding(
        &self,
    ) -> anyhow::Result<mpsc::Receiver<FeedEvent<Vec<FundingUpdate>>>> {
        let (event_tx, event_rx) = mpsc::channel(256);
        let url = self.funding_url();

        tracing::info!(url = %url, "Subscribing to mark price stream for all markets");

        let ws_rx = WsClient::new(self.ws_config(url)).subscribe();
        tokio::spawn(async move {
            Self::run_message_loop(ws_rx, event_tx, |text, _| Self::parse_mark_prices(text)).await;
        });

        Ok(event_rx)
    }
}

#[async_trait]
impl CaptureFeed for BinanceFeed {
    async fn subscribe_symbol(
        &self,
        symbol: &str,
    ) -> anyhow::Result<mpsc::Receiver<FeedEvent<Received<CaptureMessage>>>> {
        let (event_tx, event_rx) = mpsc::channel(4096);
        let url = self.capture_url(symbol);

        tracing::info!(symbol, url = %url, "Subscribing to book ticker and aggregate trades");

        let ws_rx = WsClient::new(self.ws_config(url)).subscribe();
        tokio::spawn(async move {
            Self::run_message_loop(ws_rx, event_tx, |text, local_ts| {
                Self::parse_capture_message(text).map(|message| Received { local_ts, message })
            })
            .await;
        });

        Ok(event_rx)
    }
}
