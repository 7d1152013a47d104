//! Capture sessions and the capture log

mod parquet;
mod session;
mod sink;
mod types;

pub use parquet::{capture_schema, CaptureLog, CaptureLogReader, CaptureLogWriter};
pub use session::{CaptureSession, CompletedSession, SessionSummary};
pub use sink::{write_with_retries, CaptureSink, RetryPolicy};
pub use types::{CaptureIoError, CaptureRecord, RecordKind, RecordPayload, SessionKey};
