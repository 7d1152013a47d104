//! Clock offset estimation against the exchange server clock

use crate::config::ClockConfig;
use crate::market::{RoundTrip, ServerTimeSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Published estimate of the server clock relative to the local clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockOffset {
    /// Server clock minus local clock, in milliseconds
    pub offset_ms: f64,
    /// Successful round trips behind the estimate
    pub samples: usize,
    /// Fastest round trip observed, in milliseconds
    pub min_rtt_ms: f64,
    pub updated_at: DateTime<Utc>,
}

impl ClockOffset {
    /// Placeholder used before any estimate succeeds
    pub fn unknown(now: DateTime<Utc>) -> Self {
        Self {
            offset_ms: 0.0,
            samples: 0,
            min_rtt_ms: 0.0,
            updated_at: now,
        }
    }

    /// How far the local clock runs ahead of the server clock
    pub fn local_lead_ms(&self) -> f64 {
        -self.offset_ms
    }

    pub fn is_estimated(&self) -> bool {
        self.samples > 0
    }

    /// Median estimate over a set of round trips
    pub fn from_round_trips(round_trips: &[RoundTrip], now: DateTime<Utc>) -> Option<Self> {
        let mut offsets: Vec<f64> = round_trips.iter().map(RoundTrip::offset_ms).collect();
        let offset_ms = median(&mut offsets)?;
        let min_rtt_ms = round_trips
            .iter()
            .map(RoundTrip::rtt_ms)
            .fold(f64::INFINITY, f64::min);

        Some(Self {
            offset_ms,
            samples: round_trips.len(),
            min_rtt_ms,
            updated_at: now,
        })
    }
}

/// Median of `values`; the mean of the two middle values for even lengths
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Clock offset estimation errors
#[derive(Debug, Clone, Error)]
pub enum ClockOffsetError {
    /// Every round trip failed
    #[error("no successful server time round trip out of {attempted} attempts (last error: {last_error})")]
    NoSamples { attempted: usize, last_error: String },
    /// Estimator configured with zero samples
    #[error("clock offset estimator configured with zero samples")]
    NoSamplesConfigured,
}

/// Estimator configuration
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    pub samples: usize,
    pub spacing: Duration,
    pub warmup: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            samples: 20,
            spacing: Duration::from_millis(50),
            warmup: true,
        }
    }
}

impl From<&ClockConfig> for EstimatorConfig {
    fn from(config: &ClockConfig) -> Self {
        Self {
            samples: config.samples,
            spacing: Duration::from_millis(config.sample_spacing_ms),
            warmup: config.warmup,
        }
    }
}

/// Samples server time and publishes the median offset
///
/// The published value is replaced whole; readers take a copy through
/// [`ClockOffsetEstimator::current`] or a watch subscription.
pub struct ClockOffsetEstimator {
    source: Arc<dyn ServerTimeSource>,
    config: EstimatorConfig,
    published: watch::Sender<ClockOffset>,
}

impl ClockOffsetEstimator {
    pub fn new(source: Arc<dyn ServerTimeSource>, config: EstimatorConfig) -> Self {
        let (published, _) = watch::channel(ClockOffset::unknown(Utc::now()));
        Self {
            source,
            config,
            published,
        }
    }

    /// Collect round trips; failed requests are skipped
    pub async fn collect(&self) -> Result<Vec<RoundTrip>, ClockOffsetError> {
        if self.config.samples == 0 {
            return Err(ClockOffsetError::NoSamplesConfigured);
        }

        if self.config.warmup {
            if let Err(e) = self.source.round_trip().await {
                tracing::debug!(error = %e, "Warmup server time request failed");
            }
        }

        let mut round_trips = Vec::with_capacity(self.config.samples);
        let mut last_error = String::new();

        for i in 0..self.config.samples {
            if i > 0 && !self.config.spacing.is_zero() {
                tokio::time::sleep(self.config.spacing).await;
            }
            match self.source.round_trip().await {
                Ok(round_trip) => {
                    tracing::trace!(
                        sample = i + 1,
                        rtt_ms = round_trip.rtt_ms(),
                        offset_ms = round_trip.offset_ms(),
                        "Server time sample"
                    );
                    round_trips.push(round_trip);
                }
                Err(e) => {
                    tracing::debug!(sample = i + 1, error = %e, "Server time sample failed");
                    last_error = e.to_string();
                }
            }
        }

        if round_trips.is_empty() {
            return Err(ClockOffsetError::NoSamples {
                attempted: self.config.samples,
                last_error,
            });
        }

        Ok(round_trips)
    }

    /// Sample and compute a new estimate without publishing it
    pub async fn estimate(&self) -> Result<ClockOffset, ClockOffsetError> {
        let round_trips = self.collect().await?;
        ClockOffset::from_round_trips(&round_trips, Utc::now()).ok_or(
            ClockOffsetError::NoSamples {
                attempted: self.config.samples,
                last_error: String::new(),
            },
        )
    }

    /// Publish an estimate result
    ///
    /// On error the previous value stays in place and a warning is logged.
    pub fn publish(&self, result: Result<ClockOffset, ClockOffsetError>) -> ClockOffset {
        match result {
            Ok(offset) => {
                tracing::info!(
                    offset_ms = offset.offset_ms,
                    samples = offset.samples,
                    min_rtt_ms = offset.min_rtt_ms,
                    "Clock offset updated"
                );
                self.published.send_replace(offset);
                offset
            }
            Err(e) => {
                let previous = self.current();
                tracing::warn!(
                    error = %e,
                    offset_ms = previous.offset_ms,
                    "Clock offset estimate failed, keeping last known offset"
                );
                previous
            }
        }
    }

    /// Estimate and publish
    pub async fn refresh(&self) -> ClockOffset {
        let result = self.estimate().await;
        self.publish(result)
    }

    /// Currently published offset
    pub fn current(&self) -> ClockOffset {
        *self.published.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClockOffset> {
        self.published.subscribe()
    }
}
