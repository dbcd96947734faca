//! Event ingestor: normalizes the feed into ledger and registry calls.
//!
//! Logically single-writer: one ingestor task owns the feed and applies
//! events in order. A reorg notification invalidates every epoch whose data
//! originated at or after the reorg point before any later event is
//! processed, so replay is invalidate-then-replay, never reordering.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chain::event::{parse_event, ChainEvent};
use crate::chain::feed::{EventSource, FeedError};
use crate::chain::head::ChainHead;
use crate::ledger::EpochLedger;
use crate::metrics::GatewayMetrics;
use crate::models::Market;
use crate::registry::MarketRegistry;

pub struct EventIngestor {
    source: Box<dyn EventSource>,
    ledger: Arc<EpochLedger>,
    registry: Arc<MarketRegistry>,
    head: Arc<ChainHead>,
    metrics: Arc<GatewayMetrics>,
}

impl EventIngestor {
    pub fn new(
        source: Box<dyn EventSource>,
        ledger: Arc<EpochLedger>,
        registry: Arc<MarketRegistry>,
        head: Arc<ChainHead>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            source,
            ledger,
            registry,
            head,
            metrics,
        }
    }

    /// Run until the feed ends or shutdown fires. On shutdown the source is
    /// closed and already-buffered events are drained before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    self.source.close();
                    self.drain().await;
                    info!("ingestor drained and stopped");
                    return;
                }
                next = self.source.next() => {
                    match next {
                        Ok(Some(raw)) => self.handle_raw(&raw),
                        Ok(None) => {
                            info!("feed ended, ingestor stopping");
                            return;
                        }
                        Err(e) => {
                            warn!("feed error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn drain(&mut self) {
        loop {
            match self.source.next().await {
                Ok(Some(raw)) => self.handle_raw(&raw),
                Ok(None) => return,
                Err(e) => {
                    warn!("feed error during drain: {e}");
                    return;
                }
            }
        }
    }

    fn handle_raw(&self, raw: &str) {
        match parse_event(raw) {
            Ok(event) => self.apply(event),
            Err(e) => {
                GatewayMetrics::incr(&self.metrics.events_malformed);
                let err = FeedError::MalformedEvent(e.to_string());
                warn!("dropping feed payload: {err}");
            }
        }
    }

    fn apply(&self, event: ChainEvent) {
        GatewayMetrics::incr(&self.metrics.events_ingested);
        if let Some(block) = event.block() {
            self.head.observe_block(block);
        }

        // Ledger rejections are per-submission faults; they are counted and
        // never stall ingestion for other markets or epochs.
        match event {
            ChainEvent::Commit {
                block,
                market_id,
                epoch_id,
                oracle_id,
                commit_hash,
            } => {
                if let Err(e) =
                    self.ledger
                        .record_commit(&market_id, epoch_id, &oracle_id, &commit_hash, block)
                {
                    debug!(market = %market_id, epoch = epoch_id, oracle = %oracle_id, "commit rejected: {e}");
                }
            }
            ChainEvent::Reveal {
                block,
                market_id,
                epoch_id,
                oracle_id,
                value,
                salt,
            } => {
                if let Err(e) = self.ledger.record_reveal(
                    &market_id, epoch_id, &oracle_id, &value, &salt, block,
                ) {
                    debug!(market = %market_id, epoch = epoch_id, oracle = %oracle_id, "reveal rejected: {e}");
                }
            }
            ChainEvent::MarketUpsert {
                market_id,
                domain,
                status,
            } => {
                self.registry.upsert(Market {
                    market_id,
                    domain,
                    status,
                });
            }
            ChainEvent::Reorg { depth, from_block } => self.handle_reorg(depth, from_block),
        }
    }

    fn handle_reorg(&self, depth: u64, from_block: u64) {
        self.head.observe_reorg(from_block);
        GatewayMetrics::incr(&self.metrics.reorgs_handled);

        let affected = self.ledger.epochs_at_or_after(from_block);
        let epoch_count: usize = affected.iter().map(|(_, epochs)| epochs.len()).sum();
        for (market_id, epoch_ids) in &affected {
            self.ledger.invalidate(market_id, epoch_ids);
        }
        info!(
            depth,
            from_block,
            markets = affected.len(),
            epochs = epoch_count,
            "reorg handled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::chain::feed::ChannelSource;
    use crate::config::{IntervalConfig, WeightingConfig};
    use crate::fanout::FanoutHub;
    use crate::ledger::{commitment, LedgerConfig};
    use crate::store::PredictionStore;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    struct Harness {
        tx: mpsc::Sender<String>,
        shutdown_tx: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
        store: Arc<PredictionStore>,
        registry: Arc<MarketRegistry>,
        head: Arc<ChainHead>,
        metrics: Arc<GatewayMetrics>,
    }

    fn spawn_harness() -> Harness {
        let metrics = Arc::new(GatewayMetrics::new());
        let store = Arc::new(PredictionStore::new(16));
        let hub = Arc::new(FanoutHub::new(64, metrics.clone()));
        let registry = Arc::new(MarketRegistry::new());
        let head = Arc::new(ChainHead::new());
        let ledger = Arc::new(EpochLedger::new(
            LedgerConfig::default(),
            Aggregator::from_config(
                &WeightingConfig::Equal,
                &IntervalConfig::Percentile { lo_q: 0.10, hi_q: 0.90 },
            ),
            store.clone(),
            hub,
            metrics.clone(),
        ));

        let (tx, source) = ChannelSource::new(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingestor = EventIngestor::new(
            Box::new(source),
            ledger,
            registry.clone(),
            head.clone(),
            metrics.clone(),
        );
        let task = tokio::spawn(ingestor.run(shutdown_rx));

        Harness {
            tx,
            shutdown_tx,
            task,
            store,
            registry,
            head,
            metrics,
        }
    }

    struct Finished {
        store: Arc<PredictionStore>,
        registry: Arc<MarketRegistry>,
        head: Arc<ChainHead>,
        metrics: Arc<GatewayMetrics>,
    }

    impl Harness {
        async fn send(&self, raw: &str) {
            self.tx.send(raw.to_string()).await.unwrap();
        }

        /// Drop the feed sender so the ingestor drains and exits, then wait
        /// for it and hand back the shared state for assertions.
        async fn finish(self) -> Finished {
            drop(self.tx);
            self.task.await.unwrap();
            Finished {
                store: self.store,
                registry: self.registry,
                head: self.head,
                metrics: self.metrics,
            }
        }
    }

    fn commit_json(market: &str, epoch: u64, oracle: &str, hash: &str, block: u64) -> String {
        format!(
            r#"{{"type":"commit","block":{block},"market_id":"{market}","epoch_id":{epoch},"oracle_id":"{oracle}","commit_hash":"{hash}"}}"#
        )
    }

    fn reveal_json(
        market: &str,
        epoch: u64,
        oracle: &str,
        value: &BTreeMap<String, f64>,
        salt: &str,
        block: u64,
    ) -> String {
        format!(
            r#"{{"type":"reveal","block":{block},"market_id":"{market}","epoch_id":{epoch},"oracle_id":"{oracle}","value":{},"salt":"{salt}"}}"#,
            serde_json::to_string(value).unwrap()
        )
    }

    fn value(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn commit_reveal_flow_publishes_prediction() {
        let h = spawn_harness();
        let v = value(&[("yes", 0.7)]);
        let hash = commitment::commitment_hash(&v, "s1");

        h.send(&commit_json("M1", 5, "A", &hash, 100)).await;
        h.send(&reveal_json("M1", 5, "A", &v, "s1", 110)).await;
        let h = h.finish().await;

        let latest = h.store.latest("M1").unwrap();
        assert_eq!(latest.epoch_id, 5);
        assert_eq!(latest.outcomes["yes"].p, 0.7);
        assert_eq!(h.head.snapshot().last_block, 110);
    }

    #[tokio::test]
    async fn malformed_events_are_dropped_not_fatal() {
        let h = spawn_harness();
        let v = value(&[("yes", 0.6)]);
        let hash = commitment::commitment_hash(&v, "s1");

        h.send("garbage not json").await;
        h.send(r#"{"type":"commit","block":"wrong shape"}"#).await;
        h.send(&commit_json("M1", 1, "A", &hash, 100)).await;
        h.send(&reveal_json("M1", 1, "A", &v, "s1", 101)).await;
        let h = h.finish().await;

        assert_eq!(h.metrics.events_malformed.load(Ordering::Relaxed), 2);
        assert!(h.store.latest("M1").is_some());
    }

    #[tokio::test]
    async fn reorg_invalidates_and_replay_republishes() {
        let h = spawn_harness();
        let v4 = value(&[("yes", 0.4)]);
        let v5 = value(&[("yes", 0.8)]);
        let h4 = commitment::commitment_hash(&v4, "s4");
        let h5 = commitment::commitment_hash(&v5, "s5");

        h.send(&commit_json("M1", 4, "A", &h4, 90)).await;
        h.send(&reveal_json("M1", 4, "A", &v4, "s4", 95)).await;
        h.send(&commit_json("M1", 5, "A", &h5, 120)).await;
        h.send(&reveal_json("M1", 5, "A", &v5, "s5", 125)).await;

        // Reorg below epoch 5's origin: epoch 5 goes, epoch 4 stays.
        h.send(r#"{"type":"reorg","depth":2,"from_block":118}"#).await;
        h.send(&commit_json("M1", 5, "A", &h5, 118)).await;
        h.send(&reveal_json("M1", 5, "A", &v5, "s5", 119)).await;
        let h = h.finish().await;

        let latest = h.store.latest("M1").unwrap();
        assert_eq!(latest.epoch_id, 5);
        assert_eq!(latest.version, 2);
        assert_eq!(h.metrics.reorgs_handled.load(Ordering::Relaxed), 1);

        // Epoch 4 survived the rollback underneath.
        let history = h.store.history("M1");
        assert!(history.iter().any(|p| p.epoch_id == 4));
    }

    #[tokio::test]
    async fn market_upsert_updates_registry() {
        let h = spawn_harness();
        h.send(r#"{"type":"market_upsert","market_id":"M1","domain":"sports","status":"active"}"#)
            .await;
        h.send(r#"{"type":"market_upsert","market_id":"M1","domain":"sports","status":"paused"}"#)
            .await;
        let h = h.finish().await;

        assert_eq!(h.registry.len(), 1);
        assert_eq!(
            h.registry.get("M1").unwrap().status,
            crate::models::MarketStatus::Paused
        );
    }

    #[tokio::test]
    async fn shutdown_drains_buffered_events() {
        let h = spawn_harness();
        let v = value(&[("yes", 0.9)]);
        let hash = commitment::commitment_hash(&v, "s1");

        h.send(&commit_json("M1", 1, "A", &hash, 10)).await;
        h.send(&reveal_json("M1", 1, "A", &v, "s1", 11)).await;

        h.shutdown_tx.send(true).unwrap();
        h.task.await.unwrap();

        assert!(h.store.latest("M1").is_some());
    }
}
