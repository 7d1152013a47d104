//! Binance futures REST client
//!
//! Used for the two lookups the streams do not carry: server time for clock
//! offset estimation, and per-symbol funding intervals.

use super::{FundingInfo, FundingInfoSource, RoundTrip, ServerTimeSource};
use crate::config::FeedConfig;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Binance USDⓈ-M futures REST base URL
pub const BINANCE_FUTURES_REST_URL: &str = "https://fapi.binance.com";

/// Configuration for the REST client
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_REST_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&FeedConfig> for RestConfig {
    fn from(config: &FeedConfig) -> Self {
        Self {
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// `GET /fapi/v1/time` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTimeResponse {
    server_time: i64,
}

/// One element of `GET /fapi/v1/fundingInfo`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingInfoResponse {
    symbol: String,
    funding_interval_hours: Option<u32>,
}

/// Client for the futures REST API
pub struct BinanceRestClient {
    config: RestConfig,
    client: Client,
}

impl BinanceRestClient {
    /// Create a client against the production endpoint
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(RestConfig::default())
    }

    /// Create a client with custom configuration
    pub fn with_config(config: RestConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Fetch the exchange server time in milliseconds
    pub async fn server_time_ms(&self) -> anyhow::Result<i64> {
        let url = format!("{}/fapi/v1/time", self.config.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Server time request failed: {} - {}", status, body);
        }

        let body: ServerTimeResponse = response.json().await?;
        Ok(body.server_time)
    }

    /// Fetch symbols with a non-default funding interval
    pub async fn fetch_funding_info(&self) -> anyhow::Result<Vec<FundingInfo>> {
        let url = format!("{}/fapi/v1/fundingInfo", self.config.base_url);

        tracing::debug!(url = %url, "Fetching funding intervals");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Funding info request failed: {} - {}", status, body);
        }

        let text = response.text().await?;
        let infos = parse_funding_info(&text)?;

        tracing::info!(listed = infos.len(), "Fetched funding intervals");

        Ok(infos)
    }
}

/// Parse a funding info body, skipping entries without an interval
fn parse_funding_info(body: &str) -> anyhow::Result<Vec<FundingInfo>> {
    let entries: Vec<FundingInfoResponse> = serde_json::from_str(body)?;
    Ok(entries
        .into_iter()
        .filter_map(|e| {
            Some(FundingInfo {
                interval_hours: e.funding_interval_hours?,
                symbol: e.symbol,
            })
        })
        .collect())
}

#[async_trait]
impl ServerTimeSource for BinanceRestClient {
    async fn round_trip(&self) -> anyhow::Result<RoundTrip> {
        let send_time = Utc::now();
        let server_ms = self.server_time_ms().await?;
        let receive_time = Utc::now();

        let server_time = Utc
            .timestamp_millis_opt(server_ms)
            .single()
            .ok_or_else(|| anyhow::anyhow!("Invalid server time: {}", server_ms))?;

        Ok(RoundTrip {
            send_time,
            server_time,
            receive_time,
        })
    }
}

#[async_trait]
impl FundingInfoSource for BinanceRestClient {
    async fn funding_info(&self) -> anyhow::Result<Vec<FundingInfo>> {
        self.fetch_funding_info().await
    }
}
