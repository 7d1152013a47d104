//! Bounded background execution
//!
//! Slow or blocking work runs off the event loop; each job reports back
//! with a [`Completion`] on a channel the loop selects on.

use crate::capture::{
    write_with_retries, CaptureIoError, CaptureSink, CompletedSession, RetryPolicy, SessionKey,
    SessionSummary,
};
use crate::latency::{ClockOffset, ClockOffsetError, ClockOffsetEstimator};
use crate::market::{FundingInfo, FundingInfoSource};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};

/// Result of a background job
#[derive(Debug)]
pub enum Completion {
    /// Clock offset estimate, not yet published
    ClockOffset(Result<ClockOffset, ClockOffsetError>),
    /// Funding interval lookup
    FundingInfo(Result<Vec<FundingInfo>, String>),
    /// Capture log write finished or gave up
    Flushed {
        key: SessionKey,
        summary: SessionSummary,
        partial: bool,
        elapsed: Duration,
        result: Result<PathBuf, CaptureIoError>,
    },
}

/// Runs jobs with at most `max_jobs` in flight
pub struct BackgroundWorker {
    permits: Arc<Semaphore>,
    tx: mpsc::Sender<Completion>,
}

impl BackgroundWorker {
    pub fn new(max_jobs: usize) -> (Self, mpsc::Receiver<Completion>) {
        let (tx, rx) = mpsc::channel(64);
        let worker = Self {
            permits: Arc::new(Semaphore::new(max_jobs.max(1))),
            tx,
        };
        (worker, rx)
    }

    /// Jobs that could start right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run an async job
    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let completion = job.await;
            if tx.send(completion).await.is_err() {
                tracing::debug!("Completion receiver dropped");
            }
        });
    }

    /// Estimate the clock offset; the caller publishes the result
    pub fn estimate_offset(&self, estimator: Arc<ClockOffsetEstimator>) {
        self.spawn(async move { Completion::ClockOffset(estimator.estimate().await) });
    }

    /// Look up funding intervals
    pub fn lookup_intervals(&self, source: Arc<dyn FundingInfoSource>) {
        self.spawn(async move {
            Completion::FundingInfo(source.funding_info().await.map_err(|e| format!("{:#}", e)))
        });
    }

    /// Write a completed session on the blocking pool
    ///
    /// Always yields a `Flushed` completion, even when the write task dies.
    pub fn flush(&self, sink: Arc<dyn CaptureSink>, session: CompletedSession, policy: RetryPolicy) {
        let key = session.key.clone();
        let summary = session.summary();
        let partial = session.partial;

        self.spawn(async move {
            let started = Instant::now();
            let result = tokio::task::spawn_blocking(move || {
                write_with_retries(sink.as_ref(), &session, policy)
            })
            .await
            .unwrap_or_else(|e| Err(CaptureIoError::WorkerUnavailable(e.to_string())));

            Completion::Flushed {
                key,
                summary,
                partial,
                elapsed: started.elapsed(),
                result,
            }
        });
    }
}
