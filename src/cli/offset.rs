//! Offset command implementation

use crate::config::Config;
use crate::latency::{median, ClockOffsetEstimator, EstimatorConfig};
use crate::market::{BinanceRestClient, RestConfig, RoundTrip};
use clap::Args;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct OffsetArgs {
    /// Number of round trips
    #[arg(short, long)]
    pub samples: Option<usize>,

    /// Pause between round trips in milliseconds
    #[arg(long)]
    pub spacing_ms: Option<u64>,
}

impl OffsetArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mut estimator_config = EstimatorConfig::from(&config.clock);
        if let Some(samples) = self.samples {
            estimator_config.samples = samples;
        }
        if let Some(spacing_ms) = self.spacing_ms {
            estimator_config.spacing = Duration::from_millis(spacing_ms);
        }

        let rest = BinanceRestClient::with_config(RestConfig::from(&config.feed))?;
        tracing::info!(
            url = rest.base_url(),
            samples = estimator_config.samples,
            "Measuring clock offset"
        );

        let estimator = ClockOffsetEstimator::new(Arc::new(rest), estimator_config);
        let round_trips = estimator.collect().await?;
        let report = OffsetReport::from_round_trips(&round_trips)
            .ok_or_else(|| anyhow::anyhow!("No round trips to report"))?;

        println!("{}", report);
        Ok(())
    }
}

/// Summary of one offset measurement run
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetReport {
    pub samples: usize,
    pub min_rtt_ms: f64,
    pub max_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    /// Median of per-sample offsets, server minus local
    pub median_offset_ms: f64,
    /// Offset of the fastest round trip
    pub best_offset_ms: f64,
}

impl OffsetReport {
    pub fn from_round_trips(round_trips: &[RoundTrip]) -> Option<Self> {
        let best = round_trips
            .iter()
            .min_by(|a, b| a.rtt_ms().total_cmp(&b.rtt_ms()))?;
        let rtts: Vec<f64> = round_trips.iter().map(RoundTrip::rtt_ms).collect();
        let mut offsets: Vec<f64> = round_trips.iter().map(RoundTrip::offset_ms).collect();

        Some(Self {
            samples: round_trips.len(),
            min_rtt_ms: rtts.iter().copied().fold(f64::INFINITY, f64::min),
            max_rtt_ms: rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg_rtt_ms: rtts.iter().sum::<f64>() / rtts.len() as f64,
            median_offset_ms: median(&mut offsets)?,
            best_offset_ms: best.offset_ms(),
        })
    }

    /// Plain-language direction of the local clock error
    pub fn verdict(&self) -> String {
        let offset = self.median_offset_ms;
        if offset > 0.0 {
            format!("Local clock is {:.3} ms behind the server", offset)
        } else if offset < 0.0 {
            format!("Local clock is {:.3} ms ahead of the server", -offset)
        } else {
            "Local clock matches the server".to_string()
        }
    }
}

impl fmt::Display for OffsetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Clock offset over {} round trips:", self.samples)?;
        writeln!(
            f,
            "  RTT min/avg/max: {:.3} / {:.3} / {:.3} ms",
            self.min_rtt_ms, self.avg_rtt_ms, self.max_rtt_ms
        )?;
        writeln!(f, "  Median offset:   {:+.3} ms", self.median_offset_ms)?;
        writeln!(f, "  Best-RTT offset: {:+.3} ms", self.best_offset_ms)?;
        write!(f, "  {}", self.verdict())
    }
}
