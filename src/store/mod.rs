//! Versioned prediction store with an atomically swappable latest view.
//!
//! Readers load the latest prediction through an ArcSwap pointer, so the
//! only mutation they can race with is the pointer swap itself. History is
//! bounded per market and supports rollback after reorg invalidation.

pub mod audit;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::models::Prediction;
use audit::AuditLog;

struct MarketSlot {
    latest: ArcSwapOption<Prediction>,
    // Oldest first; bounded by history_limit.
    history: Mutex<VecDeque<Arc<Prediction>>>,
}

impl MarketSlot {
    fn new() -> Self {
        Self {
            latest: ArcSwapOption::const_empty(),
            history: Mutex::new(VecDeque::new()),
        }
    }
}

pub struct PredictionStore {
    markets: RwLock<HashMap<String, Arc<MarketSlot>>>,
    history_limit: usize,
    audit: Option<AuditLog>,
}

impl PredictionStore {
    pub fn new(history_limit: usize) -> Self {
        Self::with_audit(history_limit, None)
    }

    pub fn with_audit(history_limit: usize, audit: Option<AuditLog>) -> Self {
        Self {
            markets: RwLock::new(HashMap::new()),
            history_limit: history_limit.max(1),
            audit,
        }
    }

    fn slot(&self, market_id: &str) -> Arc<MarketSlot> {
        if let Some(slot) = self.markets.read().get(market_id) {
            return slot.clone();
        }
        self.markets
            .write()
            .entry(market_id.to_string())
            .or_insert_with(|| Arc::new(MarketSlot::new()))
            .clone()
    }

    /// Publish a prediction: append to history and swap the latest pointer
    /// in one atomic step visible to readers as all-or-nothing.
    pub fn publish(&self, prediction: Prediction) {
        let slot = self.slot(&prediction.market_id);
        let prediction = Arc::new(prediction);

        {
            let mut history = slot.history.lock();
            history.push_back(prediction.clone());
            while history.len() > self.history_limit {
                history.pop_front();
            }
            slot.latest.store(Some(prediction.clone()));
        }

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record_publish(&prediction) {
                warn!(market = %prediction.market_id, "audit publish write failed: {e:#}");
            }
        }
    }

    /// Remove an epoch's predictions from history; if one of them was the
    /// latest, restore the pointer to the newest remaining prediction (or
    /// none). Returns true if anything was removed.
    pub fn rollback(&self, market_id: &str, epoch_id: u64) -> bool {
        let Some(slot) = self.markets.read().get(market_id).cloned() else {
            return false;
        };

        let removed = {
            let mut history = slot.history.lock();
            let before = history.len();
            history.retain(|p| p.epoch_id != epoch_id);
            let removed = history.len() != before;

            let latest_is_victim = slot
                .latest
                .load()
                .as_ref()
                .map(|p| p.epoch_id == epoch_id)
                .unwrap_or(false);
            if latest_is_victim {
                slot.latest.store(history.back().cloned());
            }
            removed
        };

        if removed {
            if let Some(audit) = &self.audit {
                if let Err(e) = audit.record_rollback(market_id, epoch_id) {
                    warn!(market = market_id, "audit rollback write failed: {e:#}");
                }
            }
        }
        removed
    }

    /// Lock-free read of the latest published prediction for a market.
    pub fn latest(&self, market_id: &str) -> Option<Arc<Prediction>> {
        let slot = self.markets.read().get(market_id).cloned()?;
        slot.latest.load_full()
    }

    /// Prior predictions for a market, oldest first.
    pub fn history(&self, market_id: &str) -> Vec<Arc<Prediction>> {
        match self.markets.read().get(market_id) {
            Some(slot) => slot.history.lock().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn audit(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }
}
