//! Gateway-wide counters, exposed in Prometheus text format on /metrics.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub events_ingested: AtomicU64,
    pub events_malformed: AtomicU64,
    pub commits_recorded: AtomicU64,
    pub commits_rejected_stale: AtomicU64,
    pub reveals_recorded: AtomicU64,
    pub reveals_rejected_hash: AtomicU64,
    pub reveals_rejected_unknown: AtomicU64,
    pub reveals_rejected_stale: AtomicU64,
    pub epochs_aggregated: AtomicU64,
    pub epochs_no_quorum: AtomicU64,
    pub epochs_invalidated: AtomicU64,
    pub reorgs_handled: AtomicU64,
    pub predictions_published: AtomicU64,
    pub predictions_rolled_back: AtomicU64,
    pub fanout_dropped: AtomicU64,
    pub feed_reconnects: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Render all counters in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);
        let counters: [(&str, &str, &AtomicU64); 16] = [
            (
                "m0_gateway_events_ingested_total",
                "Chain events accepted from the feed",
                &self.events_ingested,
            ),
            (
                "m0_gateway_events_malformed_total",
                "Feed payloads dropped as unparsable",
                &self.events_malformed,
            ),
            (
                "m0_gateway_commits_recorded_total",
                "Commit records accepted by the ledger",
                &self.commits_recorded,
            ),
            (
                "m0_gateway_commits_rejected_stale_total",
                "Commits rejected against closed epochs",
                &self.commits_rejected_stale,
            ),
            (
                "m0_gateway_reveals_recorded_total",
                "Reveal records accepted by the ledger",
                &self.reveals_recorded,
            ),
            (
                "m0_gateway_reveals_rejected_hash_total",
                "Reveals rejected for commitment hash mismatch",
                &self.reveals_rejected_hash,
            ),
            (
                "m0_gateway_reveals_rejected_unknown_total",
                "Reveals rejected with no prior commit",
                &self.reveals_rejected_unknown,
            ),
            (
                "m0_gateway_reveals_rejected_stale_total",
                "Reveals rejected against closed epochs",
                &self.reveals_rejected_stale,
            ),
            (
                "m0_gateway_epochs_aggregated_total",
                "Epochs that reached aggregation",
                &self.epochs_aggregated,
            ),
            (
                "m0_gateway_epochs_no_quorum_total",
                "Epochs invalidated for missing reveal quorum",
                &self.epochs_no_quorum,
            ),
            (
                "m0_gateway_epochs_invalidated_total",
                "Epochs invalidated for any reason",
                &self.epochs_invalidated,
            ),
            (
                "m0_gateway_reorgs_handled_total",
                "Reorg notifications processed",
                &self.reorgs_handled,
            ),
            (
                "m0_gateway_predictions_published_total",
                "Predictions published to the store",
                &self.predictions_published,
            ),
            (
                "m0_gateway_predictions_rolled_back_total",
                "Predictions rolled back after invalidation",
                &self.predictions_rolled_back,
            ),
            (
                "m0_gateway_fanout_dropped_total",
                "Messages dropped for lagging subscribers",
                &self.fanout_dropped,
            ),
            (
                "m0_gateway_feed_reconnects_total",
                "Upstream feed reconnect attempts",
                &self.feed_reconnects,
            ),
        ];

        for (name, help, counter) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
                counter.load(Ordering::Relaxed)
            ));
        }
        out
    }
}
