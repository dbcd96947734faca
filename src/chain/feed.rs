//! Upstream event feed sources.
//!
//! The gateway consumes an ordered event stream from a chain indexer; it
//! never implements chain consensus itself. `WsEventSource` is the
//! production source (WebSocket with reconnect + backoff), `ChannelSource`
//! backs tests and local simulation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::metrics::GatewayMetrics;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("upstream feed unavailable: {0}")]
    TransientUpstream(String),
    #[error("malformed event payload: {0}")]
    MalformedEvent(String),
}

/// An ordered source of raw feed payloads.
///
/// `next` returns `Ok(None)` once the source is closed and drained; the
/// ingestor treats that as end-of-stream.
#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> Result<Option<String>, FeedError>;

    /// Stop producing new items. Already-buffered items are still drained.
    fn close(&mut self);
}

/// Test/simulation source backed by an mpsc channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next(&mut self) -> Result<Option<String>, FeedError> {
        Ok(self.rx.recv().await)
    }

    fn close(&mut self) {
        // Stops new sends; recv keeps yielding buffered items until empty.
        self.rx.close();
    }
}

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(100);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket feed from the chain indexer, reconnecting with exponential
/// backoff and jitter on disconnect.
pub struct WsEventSource {
    url: String,
    stream: Option<WsStream>,
    reconnect_delay: Duration,
    shutdown: bool,
    metrics: Arc<GatewayMetrics>,
}

impl WsEventSource {
    pub fn new(url: impl Into<String>, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            reconnect_delay: INITIAL_RECONNECT_DELAY,
            shutdown: false,
            metrics,
        }
    }

    async fn ensure_connected(&mut self) -> Option<&mut WsStream> {
        while self.stream.is_none() && !self.shutdown {
            match connect_async(&self.url).await {
                Ok((stream, _)) => {
                    info!(url = %self.url, "feed connected");
                    self.reconnect_delay = INITIAL_RECONNECT_DELAY;
                    self.stream = Some(stream);
                }
                Err(e) => {
                    let err = FeedError::TransientUpstream(e.to_string());
                    GatewayMetrics::incr(&self.metrics.feed_reconnects);
                    warn!(
                        url = %self.url,
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "feed connect failed, retrying: {err}"
                    );
                    tokio::time::sleep(self.with_jitter(self.reconnect_delay)).await;
                    self.reconnect_delay = (self.reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }
        self.stream.as_mut()
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
        delay + Duration::from_millis(jitter_ms)
    }
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn next(&mut self) -> Result<Option<String>, FeedError> {
        loop {
            if self.shutdown {
                return Ok(None);
            }

            let Some(stream) = self.ensure_connected().await else {
                return Ok(None);
            };

            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Ping(payload))) => {
                    let _ = stream.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.stream = None;
                    GatewayMetrics::incr(&self.metrics.feed_reconnects);
                    warn!(url = %self.url, "feed stream closed, reconnecting");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.stream = None;
                    GatewayMetrics::incr(&self.metrics.feed_reconnects);
                    warn!(url = %self.url, "feed stream error, reconnecting: {e}");
                    let delay = self.with_jitter(self.reconnect_delay);
                    tokio::time::sleep(delay).await;
                    self.reconnect_delay = (self.reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }
    }

    fn close(&mut self) {
        self.shutdown = true;
    }
}
