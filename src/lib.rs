//! settle-latency: feed latency capture around funding settlements
//!
//! This library provides the core components for:
//! - Live funding rates from the Binance futures mark price stream
//! - Target selection and settlement scheduling
//! - Per-symbol quote/trade capture around the settlement instant
//! - Clock offset estimation against the exchange server time
//! - Corrected latency computation and Parquet capture logs
//! - Logging and Prometheus metrics

pub mod capture;
pub mod cli;
pub mod config;
pub mod feed;
pub mod latency;
pub mod market;
pub mod runtime;
pub mod schedule;
pub mod telemetry;
pub mod ws;
