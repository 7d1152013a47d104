//! WebSocket stream client
//!
//! One background task per subscription: reconnects with backoff, answers
//! pings, and stamps every text frame with its local receipt time.

mod client;
mod types;

pub use client::WsClient;
pub use types::{Backoff, WsConfig, WsError, WsFrame};
