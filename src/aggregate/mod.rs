//! Consensus aggregation of revealed oracle submissions.
//!
//! Aggregation is a pure function of an epoch's accepted reveal set:
//! reveals are processed in oracle-id order, so re-running it over the same
//! set after a reorg replay reproduces the published outcomes exactly.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{IntervalConfig, WeightingConfig};
use crate::models::{OutcomeStat, RevealRecord};

/// Per-oracle weight applied to the probability mean
pub trait OracleWeighting: Send + Sync {
    fn weight(&self, oracle_id: &str) -> f64;
}

/// Every oracle counts the same (default)
pub struct EqualWeight;

impl OracleWeighting for EqualWeight {
    fn weight(&self, _oracle_id: &str) -> f64 {
        1.0
    }
}

/// Static stake/reputation weights from configuration; unlisted oracles
/// fall back to weight 1.0.
pub struct StakeWeight {
    stakes: HashMap<String, f64>,
}

impl StakeWeight {
    pub fn new(stakes: HashMap<String, f64>) -> Self {
        Self { stakes }
    }
}

impl OracleWeighting for StakeWeight {
    fn weight(&self, oracle_id: &str) -> f64 {
        self.stakes.get(oracle_id).copied().unwrap_or(1.0)
    }
}

/// Confidence interval over the dispersion of submitted values.
///
/// `sorted` is non-empty and ascending. Estimators must be deterministic
/// for the same input.
pub trait IntervalEstimator: Send + Sync {
    fn interval(&self, sorted: &[f64]) -> [f64; 2];
}

/// Nearest-rank percentile interval (default 10th/90th).
///
/// A single submission collapses the interval to the point value.
pub struct PercentileInterval {
    pub lo_q: f64,
    pub hi_q: f64,
}

impl PercentileInterval {
    fn nearest_rank(q: f64, len: usize) -> usize {
        ((q * len as f64).ceil() as usize).clamp(1, len) - 1
    }
}

impl IntervalEstimator for PercentileInterval {
    fn interval(&self, sorted: &[f64]) -> [f64; 2] {
        let lo = sorted[Self::nearest_rank(self.lo_q, sorted.len())];
        let hi = sorted[Self::nearest_rank(self.hi_q, sorted.len())];
        [lo, hi]
    }
}

/// Mean +/- z * population stddev, clamped to [0, 1].
pub struct StdDevInterval {
    pub z: f64,
}

impl IntervalEstimator for StdDevInterval {
    fn interval(&self, sorted: &[f64]) -> [f64; 2] {
        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let var = sorted.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let spread = self.z * var.sqrt();
        [(mean - spread).max(0.0), (mean + spread).min(1.0)]
    }
}

/// Combines one epoch's valid reveals into per-outcome statistics.
pub struct Aggregator {
    weighting: Box<dyn OracleWeighting>,
    interval: Box<dyn IntervalEstimator>,
}

impl Aggregator {
    pub fn new(weighting: Box<dyn OracleWeighting>, interval: Box<dyn IntervalEstimator>) -> Self {
        Self {
            weighting,
            interval,
        }
    }

    pub fn from_config(weighting: &WeightingConfig, interval: &IntervalConfig) -> Self {
        let weighting: Box<dyn OracleWeighting> = match weighting {
            WeightingConfig::Equal => Box::new(EqualWeight),
            WeightingConfig::Stake(stakes) => Box::new(StakeWeight::new(stakes.clone())),
        };
        let interval: Box<dyn IntervalEstimator> = match interval {
            IntervalConfig::Percentile { lo_q, hi_q } => Box::new(PercentileInterval {
                lo_q: *lo_q,
                hi_q: *hi_q,
            }),
            IntervalConfig::StdDev { z } => Box::new(StdDevInterval { z: *z }),
        };
        Self::new(weighting, interval)
    }

    /// Aggregate a reveal set. Never mutates its input; outcome labels are
    /// the union of labels across all reveals, each averaged over the
    /// oracles that submitted it.
    pub fn aggregate(&self, reveals: &[RevealRecord]) -> BTreeMap<String, OutcomeStat> {
        let mut ordered: Vec<&RevealRecord> = reveals.iter().collect();
        ordered.sort_by(|a, b| a.oracle_id.cmp(&b.oracle_id));

        let mut labels: BTreeSet<&str> = BTreeSet::new();
        for reveal in &ordered {
            for label in reveal.value.keys() {
                labels.insert(label);
            }
        }

        let mut outcomes = BTreeMap::new();
        for label in labels {
            let mut weight_sum = 0.0;
            let mut weighted = 0.0;
            let mut submitted = Vec::with_capacity(ordered.len());

            for reveal in &ordered {
                if let Some(&p) = reveal.value.get(label) {
                    let w = self.weighting.weight(&reveal.oracle_id);
                    weight_sum += w;
                    weighted += w * p;
                    submitted.push(p);
                }
            }

            if weight_sum <= 0.0 {
                continue;
            }

            submitted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            outcomes.insert(
                label.to_string(),
                OutcomeStat {
                    p: weighted / weight_sum,
                    ci: self.interval.interval(&submitted),
                },
            );
        }
        outcomes
    }
}
