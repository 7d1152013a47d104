//! Latency measurement
//!
//! Clock offset estimation against the exchange, and conversion of captured
//! timestamp pairs into corrected latency values.

mod clock;
mod engine;

pub use clock::{median, ClockOffset, ClockOffsetError, ClockOffsetEstimator, EstimatorConfig};
pub use engine::{corrected_latency_ms, LatencyEngine};
