use clap::Parser;
use settle_latency::cli::{Cli, Commands};
use settle_latency::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using bundled example configuration");
            Config::bundled()?
        }
    };

    // Initialize telemetry
    let _telemetry = settle_latency::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting settlement monitor");
            args.execute(&config).await?;
        }
        Commands::Offset(args) => {
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Feed: ws={} rest={} max_reconnects={}",
                config.feed.ws_url, config.feed.rest_url, config.feed.max_reconnects
            );
            println!(
                "  Schedule: lead={}s window={}s default_interval={:?}h",
                config.schedule.lead_secs,
                config.schedule.window_secs,
                config.schedule.default_interval_hours
            );
            println!(
                "  Report: threshold={} min_symbols={}",
                config.schedule.report_threshold, config.schedule.report_min_symbols
            );
            println!(
                "  Capture: dir={} retries={} delay={}ms",
                config.capture.output_dir.display(),
                config.capture.write_retries,
                config.capture.retry_delay_ms
            );
            println!(
                "  Clock: samples={} spacing={}ms warmup={} min_refresh={}s",
                config.clock.samples,
                config.clock.sample_spacing_ms,
                config.clock.warmup,
                config.clock.min_refresh_secs
            );
            println!(
                "  Runtime: max_background_jobs={}",
                config.runtime.max_background_jobs
            );
            println!(
                "  Telemetry: level={} format={:?} metrics_port={:?}",
                config.telemetry.log_level,
                config.telemetry.log_format,
                config.telemetry.metrics_port
            );
        }
    }

    Ok(())
}
