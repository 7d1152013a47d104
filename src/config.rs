//! Configuration types for settle-latency

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub capture: CaptureConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Exchange connectivity configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// WebSocket stream base URL
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// REST base URL (server time, funding info)
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// Reconnection attempts before giving up (0 = infinite)
    #[serde(default)]
    pub max_reconnects: u32,

    /// First reconnection delay in milliseconds
    #[serde(default = "default_initial_reconnect_ms")]
    pub initial_reconnect_ms: u64,

    /// Upper bound for the reconnection delay in seconds
    #[serde(default = "default_max_reconnect_secs")]
    pub max_reconnect_secs: u64,

    /// REST request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_ws_url() -> String {
    "wss://fstream.binance.com".to_string()
}
fn default_rest_url() -> String {
    "https://fapi.binance.com".to_string()
}
fn default_initial_reconnect_ms() -> u64 {
    1_000
}
fn default_max_reconnect_secs() -> u64 {
    60
}
fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            rest_url: default_rest_url(),
            max_reconnects: 0,
            initial_reconnect_ms: default_initial_reconnect_ms(),
            max_reconnect_secs: default_max_reconnect_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Settlement scheduling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds before settlement at which capture starts
    #[serde(default = "default_lead_secs")]
    pub lead_secs: u64,

    /// Total capture window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Interval applied to symbols the funding info endpoint does not list
    #[serde(default = "default_interval_hours")]
    pub default_interval_hours: Option<u32>,

    /// How often funding intervals are re-fetched
    #[serde(default = "default_interval_refresh_secs")]
    pub interval_refresh_secs: u64,

    /// Minimum spacing between on-demand interval lookups
    #[serde(default = "default_interval_retry_secs")]
    pub interval_retry_secs: u64,

    /// Symbols funding below this rate are listed in the minute report
    #[serde(default = "default_report_threshold")]
    pub report_threshold: Decimal,

    /// The minute report is logged once the table holds more than this many symbols
    #[serde(default = "default_report_min_symbols")]
    pub report_min_symbols: usize,
}

fn default_lead_secs() -> u64 {
    30
}
fn default_window_secs() -> u64 {
    60
}
fn default_interval_hours() -> Option<u32> {
    Some(8)
}
fn default_interval_refresh_secs() -> u64 {
    3_600
}
fn default_interval_retry_secs() -> u64 {
    30
}
fn default_report_threshold() -> Decimal {
    Decimal::new(-3, 3) // -0.003
}
fn default_report_min_symbols() -> usize {
    100
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lead_secs: default_lead_secs(),
            window_secs: default_window_secs(),
            default_interval_hours: default_interval_hours(),
            interval_refresh_secs: default_interval_refresh_secs(),
            interval_retry_secs: default_interval_retry_secs(),
            report_threshold: default_report_threshold(),
            report_min_symbols: default_report_min_symbols(),
        }
    }
}

/// Longest accepted capture window
pub const MAX_WINDOW_SECS: u64 = 86_400;

impl ScheduleConfig {
    /// The window must open before settlement and close after it
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lead_secs == 0 {
            anyhow::bail!("schedule.lead_secs must be greater than zero");
        }
        if self.window_secs <= self.lead_secs {
            anyhow::bail!(
                "schedule.window_secs ({}) must exceed schedule.lead_secs ({})",
                self.window_secs,
                self.lead_secs
            );
        }
        if self.window_secs > MAX_WINDOW_SECS {
            anyhow::bail!(
                "schedule.window_secs ({}) exceeds the {} s limit",
                self.window_secs,
                MAX_WINDOW_SECS
            );
        }
        Ok(())
    }

    pub fn lead(&self) -> Duration {
        Duration::from_secs(self.lead_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Capture log configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub output_dir: PathBuf,

    /// Write attempts after the first failure
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Delay between write attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_write_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    250
}

/// Clock offset estimation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    /// Round trips per estimate
    #[serde(default = "default_samples")]
    pub samples: usize,

    /// Pause between round trips in milliseconds
    #[serde(default = "default_sample_spacing_ms")]
    pub sample_spacing_ms: u64,

    /// Issue one discarded request first to warm up the connection
    #[serde(default = "default_true")]
    pub warmup: bool,

    /// Minimum age of the published offset before arming re-estimates it
    #[serde(default = "default_min_refresh_secs")]
    pub min_refresh_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_samples() -> usize {
    20
}
fn default_sample_spacing_ms() -> u64 {
    50
}
fn default_min_refresh_secs() -> u64 {
    60
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            sample_spacing_ms: default_sample_spacing_ms(),
            warmup: true,
            min_refresh_secs: default_min_refresh_secs(),
        }
    }
}

/// Event loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Concurrent background jobs (log writes, REST lookups)
    #[serde(default = "default_max_background_jobs")]
    pub max_background_jobs: usize,
}

fn default_max_background_jobs() -> usize {
    4
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_background_jobs: default_max_background_jobs(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,
    /// JSON format for log aggregation
    Json,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// The example configuration shipped with the crate
    pub fn bundled() -> anyhow::Result<Self> {
        let config: Config = toml::from_str(include_str!("../config.toml.example"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot honour
    pub fn validate(&self) -> anyhow::Result<()> {
        self.schedule.validate()
    }
}
