//! Configuration loading from disk

use settle_latency::capture::RetryPolicy;
use settle_latency::config::{Config, LogFormat};
use settle_latency::runtime::MonitorConfig;
use std::io::Write;
use std::time::Duration;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_overrides_reach_monitor() {
    let file = write_config(
        r#"
[schedule]
lead_secs = 10
window_secs = 20
default_interval_hours = 4
interval_retry_secs = 5

[capture]
output_dir = "/var/lib/settle"
write_retries = 1
retry_delay_ms = 10

[telemetry]
log_format = "json"
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.telemetry.log_format, LogFormat::Json);
    assert_eq!(config.capture.output_dir.to_str(), Some("/var/lib/settle"));

    let monitor = MonitorConfig::from(&config);
    assert_eq!(monitor.scheduler.lead, chrono::Duration::seconds(10));
    assert_eq!(monitor.scheduler.window, chrono::Duration::seconds(20));
    assert_eq!(monitor.default_interval_hours, Some(4));
    assert_eq!(monitor.interval_retry, Duration::from_secs(5));
    assert_eq!(
        monitor.retry_policy,
        RetryPolicy {
            retries: 1,
            delay: Duration::from_millis(10),
        }
    );
    // Untouched sections keep their defaults
    assert_eq!(monitor.resubscribe_delay, Duration::from_millis(1_000));
    assert_eq!(monitor.max_background_jobs, 4);
}

#[test]
fn test_load_rejects_malformed_file() {
    let file = write_config("[capture\noutput_dir = 3");
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn test_bundled_matches_shipped_example() {
    let shipped = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml.example")).unwrap();
    let bundled = Config::bundled().unwrap();
    assert_eq!(shipped.schedule.lead_secs, bundled.schedule.lead_secs);
    assert_eq!(shipped.capture.output_dir, bundled.capture.output_dir);
    assert_eq!(bundled.schedule.default_interval_hours, Some(8));
}

#[test]
fn test_load_rejects_window_ending_before_settlement() {
    let file = write_config(
        r#"
[schedule]
lead_secs = 30
window_secs = 20

[capture]
output_dir = "./captures"
"#,
    );

    let err = Config::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("must exceed schedule.lead_secs"), "{}", err);
}

#[test]
fn test_load_rejects_out_of_range_window() {
    let file = write_config(
        r#"
[schedule]
lead_secs = 30
window_secs = 90000

[capture]
output_dir = "./captures"
"#,
    );

    let err = Config::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("exceeds the 86400 s limit"), "{}", err);
}
