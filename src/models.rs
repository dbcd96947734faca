use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Active,
    Paused,
    Resolved,
}

impl MarketStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MarketStatus::Active => "active",
            MarketStatus::Paused => "paused",
            MarketStatus::Resolved => "resolved",
        }
    }
}

/// A market in the registry catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub domain: String,
    pub status: MarketStatus,
}

/// Epoch phase; advances only forward except on invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochPhase {
    Commit,
    Reveal,
    Aggregated,
    Invalidated,
}

impl EpochPhase {
    pub fn as_str(&self) -> &str {
        match self {
            EpochPhase::Commit => "commit",
            EpochPhase::Reveal => "reveal",
            EpochPhase::Aggregated => "aggregated",
            EpochPhase::Invalidated => "invalidated",
        }
    }

    /// An epoch in a closed phase accepts no further submissions.
    pub fn is_closed(&self) -> bool {
        matches!(self, EpochPhase::Aggregated | EpochPhase::Invalidated)
    }
}

/// Why an epoch was invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    Reorg,
    NoQuorum,
}

/// Epoch metadata exposed on /epochs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMeta {
    pub market_id: String,
    pub epoch_id: u64,
    pub phase: EpochPhase,
    pub commit_deadline: DateTime<Utc>,
    pub reveal_deadline: DateTime<Utc>,
    pub committed_oracles: usize,
    pub revealed_oracles: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidation_reason: Option<InvalidationReason>,
}

/// One oracle's hash commitment for an epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub market_id: String,
    pub epoch_id: u64,
    pub oracle_id: String,
    pub commit_hash: String,
    pub block: u64,
    pub received_at: DateTime<Utc>,
}

/// One oracle's revealed submission: outcome label -> probability.
///
/// BTreeMap keeps label order stable so the commitment hash and the
/// aggregation output are deterministic for the same submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealRecord {
    pub market_id: String,
    pub epoch_id: u64,
    pub oracle_id: String,
    pub value: BTreeMap<String, f64>,
    pub salt: String,
    pub block: u64,
}

/// Aggregated statistics for one outcome label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStat {
    pub p: f64,
    pub ci: [f64; 2],
}

/// A published prediction for one (market, epoch).
///
/// Immutable once published. `version` starts at 1 and increments if the
/// same epoch is re-aggregated after a reorg, so a replacement is explicit
/// rather than a silent overwrite of outcomes consumers already observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub market_id: String,
    pub epoch_id: u64,
    pub version: u32,
    pub outcomes: BTreeMap<String, OutcomeStat>,
    pub reveal_count: usize,
    pub published_at: DateTime<Utc>,
}

/// Events pushed to WebSocket subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerEvent {
    Prediction(Prediction),
}
