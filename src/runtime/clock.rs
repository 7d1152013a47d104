//! Wall clock access for the event loop

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time remaining until `at`; zero once it has passed
pub fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Timer deadline for a wall-clock instant
pub fn deadline(clock: &dyn Clock, at: DateTime<Utc>) -> Instant {
    Instant::now() + until(clock.now(), at)
}
