//! Stream client configuration, frames and errors

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Reconnect delays: `initial`, doubling per attempt, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt `attempt`, counting from 1
    pub fn delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial.saturating_mul(1 << doublings).min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Reconnect attempts after a drop before giving up (0 = never give up)
    pub max_reconnects: u32,
    pub backoff: Backoff,
    /// Keepalive period; a ping still unanswered at the next tick drops the stream
    pub ping_interval: Duration,
    /// Frames buffered towards the consumer
    pub buffer: usize,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnects: 0,
            backoff: Backoff::default(),
            ping_interval: Duration::from_secs(30),
            buffer: 1024,
        }
    }

    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnects = n;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    pub fn buffer(mut self, frames: usize) -> Self {
        self.buffer = frames;
        self
    }
}

/// What a subscription delivers
#[derive(Debug, Clone, PartialEq)]
pub enum WsFrame {
    /// Text frame with the local wall-clock time it was read off the socket
    Text {
        text: String,
        received_at: DateTime<Utc>,
    },
    Connected,
    Reconnecting { attempt: u32, retry_in: Duration },
    /// Reconnect limit reached; the channel closes after this
    GaveUp,
}

/// Reasons a stream connection ends
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WsError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("stream read failed: {0}")]
    Read(String),
    #[error("stream ended without a close frame")]
    Eof,
    #[error("server closed the stream")]
    ClosedByServer,
    #[error("no pong within {0:?}")]
    PongTimeout(Duration),
    #[error("send failed: {0}")]
    Send(String),
}
