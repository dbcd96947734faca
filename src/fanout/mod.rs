//! Fanout of published predictions to live subscribers.
//!
//! Each topic is a bounded broadcast ring; a subscriber holds a cursor into
//! it. Publishing never blocks: a subscriber that falls behind loses its
//! oldest pending items and resumes at the next available message, so
//! delivery may have gaps but is never duplicated or reordered.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::metrics::GatewayMetrics;
use crate::models::{Prediction, WsServerEvent};

pub const PREDICTIONS_TOPIC: &str = "predictions";

pub struct FanoutHub {
    topics: RwLock<HashMap<String, broadcast::Sender<String>>>,
    buffer: usize,
    metrics: Arc<GatewayMetrics>,
}

impl FanoutHub {
    pub fn new(buffer: usize, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            metrics,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        if let Some(tx) = self.topics.read().get(topic) {
            return tx.clone();
        }
        self.topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .clone()
    }

    /// Register a subscriber. Dropping the handle releases it.
    pub fn subscribe(&self, topic: &str) -> SubscriberHandle {
        let id = Uuid::new_v4();
        let rx = self.sender(topic).subscribe();
        debug!(subscriber = %id, topic, "subscriber registered");
        SubscriberHandle {
            id,
            rx,
            metrics: self.metrics.clone(),
        }
    }

    /// Enqueue a message to every subscriber of the topic; returns how many
    /// subscribers were live. Never blocks on subscriber consumption.
    pub fn publish(&self, topic: &str, message: String) -> usize {
        self.sender(topic).send(message).unwrap_or(0)
    }

    pub fn publish_prediction(&self, prediction: &Prediction) {
        let event = WsServerEvent::Prediction(prediction.clone());
        let message = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        self.publish(PREDICTIONS_TOPIC, message);
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// A subscriber's cursor into a topic's broadcast stream.
pub struct SubscriberHandle {
    pub id: Uuid,
    rx: broadcast::Receiver<String>,
    metrics: Arc<GatewayMetrics>,
}

impl SubscriberHandle {
    /// Next message in publish order. Items dropped while this subscriber
    /// lagged are counted and skipped. Returns None once the hub is gone.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    GatewayMetrics::add(&self.metrics.fanout_dropped, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of `recv`.
    pub fn try_recv(&mut self) -> Option<String> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    GatewayMetrics::add(&self.metrics.fanout_dropped, n);
                }
                Err(_) => return None,
            }
        }
    }
}
