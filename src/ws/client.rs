//! Reconnecting stream reader

use super::types::{WsConfig, WsError, WsFrame};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How one connection ended
enum SessionEnd {
    /// The subscriber dropped its receiver
    ConsumerGone,
    Dropped(WsError),
}

pub struct WsClient {
    config: WsConfig,
}

impl WsClient {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Open the stream in a background task
    ///
    /// Text frames are stamped with the local wall-clock time as they are
    /// read. Drops reconnect on the backoff schedule, and the attempt count
    /// starts over once a connection comes up. Dropping the receiver sends a
    /// close frame and ends the task.
    pub fn subscribe(&self) -> mpsc::Receiver<WsFrame> {
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        tokio::spawn(supervise(self.config.clone(), tx));
        rx
    }
}

async fn supervise(config: WsConfig, tx: mpsc::Sender<WsFrame>) {
    let mut attempt: u32 = 0;

    loop {
        let (connected, end) = session(&config, &tx).await;
        let error = match end {
            SessionEnd::ConsumerGone => {
                tracing::debug!(url = %config.url, "Stream consumer gone");
                return;
            }
            SessionEnd::Dropped(error) => error,
        };

        if connected {
            attempt = 0;
        }
        attempt += 1;

        if config.max_reconnects > 0 && attempt > config.max_reconnects {
            tracing::error!(
                url = %config.url,
                error = %error,
                attempts = config.max_reconnects,
                "Giving up on stream"
            );
            let _ = tx.send(WsFrame::GaveUp).await;
            return;
        }

        let retry_in = config.backoff.delay(attempt);
        tracing::warn!(
            url = %config.url,
            error = %error,
            attempt,
            retry_in_ms = retry_in.as_millis() as u64,
            "Stream dropped, reconnecting"
        );
        if tx
            .send(WsFrame::Reconnecting { attempt, retry_in })
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_in) => {}
            _ = tx.closed() => return,
        }
    }
}

/// Connect once and pump frames until the connection ends
///
/// The flag reports whether the connection came up at all.
async fn session(config: &WsConfig, tx: &mpsc::Sender<WsFrame>) -> (bool, SessionEnd) {
    tracing::info!(url = %config.url, "Connecting stream");

    let mut stream = match connect_async(config.url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            let error = WsError::Connect {
                url: config.url.clone(),
                reason: e.to_string(),
            };
            return (false, SessionEnd::Dropped(error));
        }
    };

    tracing::info!(url = %config.url, "Stream connected");
    if tx.send(WsFrame::Connected).await.is_err() {
        let _ = stream.close(None).await;
        return (true, SessionEnd::ConsumerGone);
    }

    (true, pump(stream, config.ping_interval, tx).await)
}

async fn pump(stream: Stream, ping_every: Duration, tx: &mpsc::Sender<WsFrame>) -> SessionEnd {
    let (mut sink, mut source) = stream.split();
    let mut keepalive = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut awaiting_pong = false;

    let end = loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let received_at = Utc::now();
                    if tx.send(WsFrame::Text { text, received_at }).await.is_err() {
                        break SessionEnd::ConsumerGone;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = sink.send(Message::Pong(payload)).await {
                        break SessionEnd::Dropped(WsError::Send(e.to_string()));
                    }
                }
                Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(frame = ?frame, "Close frame received");
                    break SessionEnd::Dropped(WsError::ClosedByServer);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break SessionEnd::Dropped(WsError::Read(e.to_string())),
                None => break SessionEnd::Dropped(WsError::Eof),
            },
            _ = tx.closed() => break SessionEnd::ConsumerGone,
            _ = keepalive.tick() => {
                if awaiting_pong {
                    break SessionEnd::Dropped(WsError::PongTimeout(ping_every));
                }
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    break SessionEnd::Dropped(WsError::Send(e.to_string()));
                }
                awaiting_pong = true;
            }
        }
    };

    if matches!(end, SessionEnd::ConsumerGone) {
        let _ = sink.send(Message::Close(None)).await;
    }
    end
}
