//! Run command implementation

use crate::capture::CaptureLogWriter;
use crate::config::Config;
use crate::feed::BinanceFeed;
use crate::latency::{ClockOffsetEstimator, EstimatorConfig};
use crate::market::{BinanceRestClient, RestConfig};
use crate::runtime::{Monitor, MonitorConfig, MonitorDeps, SystemClock};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the capture log directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mut config = config.clone();
        if let Some(output) = &self.output {
            config.capture.output_dir = output.clone();
        }

        let sink = Arc::new(CaptureLogWriter::new(config.capture.output_dir.clone()));
        sink.ensure_dir()?;

        let feed = Arc::new(BinanceFeed::from_config(&config.feed));
        let rest = Arc::new(BinanceRestClient::with_config(RestConfig::from(
            &config.feed,
        ))?);
        let estimator = Arc::new(ClockOffsetEstimator::new(
            rest.clone(),
            EstimatorConfig::from(&config.clock),
        ));

        let deps = MonitorDeps {
            funding_feed: feed.clone(),
            capture_feed: feed,
            funding_info: rest,
            estimator,
            sink,
            clock: Arc::new(SystemClock),
        };
        let monitor = Monitor::new(MonitorConfig::from(&config), deps);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Interrupt received, shutting down");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Cannot listen for interrupt signal");
                    shutdown_tx.closed().await;
                }
            }
        });

        tracing::info!(
            output = ?config.capture.output_dir,
            ws_url = %config.feed.ws_url,
            "Starting settlement latency capture"
        );

        let stats = monitor.run(shutdown_rx).await?;

        println!("Sessions written: {}", stats.sessions_written);
        println!("Sessions failed:  {}", stats.sessions_failed);
        println!("Records captured: {}", stats.records_captured);
        for path in &stats.written {
            println!("  {}", path.display());
        }

        Ok(())
    }
}
