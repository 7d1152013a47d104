//! Capture log persistence with bounded retries

use super::parquet::CaptureLogWriter;
use super::session::CompletedSession;
use super::types::CaptureIoError;
use crate::config::CaptureConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Destination for completed sessions
///
/// Writes are blocking and run off the event loop.
pub trait CaptureSink: Send + Sync {
    fn write(&self, session: &CompletedSession) -> anyhow::Result<PathBuf>;

    /// Where a session's log ends up
    fn target(&self, session: &CompletedSession) -> PathBuf;
}

impl CaptureSink for CaptureLogWriter {
    fn write(&self, session: &CompletedSession) -> anyhow::Result<PathBuf> {
        CaptureLogWriter::write(self, session)
    }

    fn target(&self, session: &CompletedSession) -> PathBuf {
        self.file_path(&session.key)
    }
}

/// How often and how far apart failed writes are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first failure
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_millis(250),
        }
    }
}

impl From<&CaptureConfig> for RetryPolicy {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            retries: config.write_retries,
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Write a session, retrying failures per `policy`
///
/// Blocks the calling thread between attempts.
pub fn write_with_retries(
    sink: &dyn CaptureSink,
    session: &CompletedSession,
    policy: RetryPolicy,
) -> Result<PathBuf, CaptureIoError> {
    let attempts = policy.retries + 1;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match sink.write(session) {
            Ok(path) => return Ok(path),
            Err(e) => {
                tracing::warn!(
                    session = %session.id,
                    attempt,
                    attempts,
                    error = %e,
                    "Capture log write failed"
                );
                last_error = e.to_string();
            }
        }
        if attempt < attempts && !policy.delay.is_zero() {
            std::thread::sleep(policy.delay);
        }
    }

    Err(CaptureIoError::RetriesExhausted {
        path: sink.target(session),
        attempts,
        message: last_error,
    })
}
