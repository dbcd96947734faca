//! Wire format of the upstream indexer feed.
//!
//! The indexer emits one JSON object per event, tagged by `type`. The
//! gateway trusts that commit/reveal items were already validated on-chain;
//! it only normalizes them into ledger and registry calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::MarketStatus;

/// A normalized chain event as delivered by the indexer feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    Commit {
        block: u64,
        market_id: String,
        epoch_id: u64,
        oracle_id: String,
        commit_hash: String,
    },
    Reveal {
        block: u64,
        market_id: String,
        epoch_id: u64,
        oracle_id: String,
        value: BTreeMap<String, f64>,
        salt: String,
    },
    MarketUpsert {
        market_id: String,
        domain: String,
        status: MarketStatus,
    },
    Reorg {
        depth: u64,
        from_block: u64,
    },
}

impl ChainEvent {
    /// Block the event originated at, where applicable.
    pub fn block(&self) -> Option<u64> {
        match self {
            ChainEvent::Commit { block, .. } | ChainEvent::Reveal { block, .. } => Some(*block),
            ChainEvent::MarketUpsert { .. } => None,
            ChainEvent::Reorg { .. } => None,
        }
    }
}

/// Parse one feed payload. Unparsable payloads are the caller's problem to
/// count and drop; they must never crash the pipeline.
pub fn parse_event(raw: &str) -> Result<ChainEvent, serde_json::Error> {
    serde_json::from_str(raw)
}
