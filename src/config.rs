use std::collections::HashMap;
use std::env;

/// Gateway configuration, loaded from the environment with sane defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Upstream indexer feed WebSocket URL; empty disables the feed task.
    pub feed_url: String,
    pub quorum_fraction: f64,
    pub min_reveals: usize,
    pub commit_window_secs: i64,
    pub reveal_window_secs: i64,
    pub deadline_sweep_secs: u64,
    pub prediction_history_limit: usize,
    pub fanout_buffer: usize,
    pub weighting: WeightingConfig,
    pub interval_estimator: IntervalConfig,
    /// Empty disables the audit log.
    pub audit_db_path: String,
    /// Optional URL or file path of a JSON market catalog loaded at startup.
    pub markets_bootstrap: Option<String>,
}

/// Oracle weighting scheme, selected at construction time
#[derive(Debug, Clone)]
pub enum WeightingConfig {
    Equal,
    /// Static per-oracle weights; oracles not listed get weight 1.0.
    Stake(HashMap<String, f64>),
}

/// Confidence interval estimator, selected at construction time
#[derive(Debug, Clone)]
pub enum IntervalConfig {
    /// Nearest-rank percentile of the submitted values.
    Percentile { lo_q: f64, hi_q: f64 },
    /// Mean +/- z * population stddev, clamped to [0, 1].
    StdDev { z: f64 },
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let feed_url = env::var("FEED_URL").unwrap_or_default();

        let quorum_fraction = env::var("QUORUM_FRACTION")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|&v| v > 0.0 && v <= 1.0)
            .unwrap_or(0.67);

        let min_reveals = env::var("MIN_REVEALS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(1);

        let commit_window_secs = env::var("COMMIT_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(300);

        let reveal_window_secs = env::var("REVEAL_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(300);

        let deadline_sweep_secs = env::var("DEADLINE_SWEEP_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(5);

        let prediction_history_limit = env::var("PREDICTION_HISTORY_LIMIT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(64);

        let fanout_buffer = env::var("FANOUT_BUFFER")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(512);

        let weighting = match env::var("WEIGHTING").as_deref() {
            Ok("stake") => {
                WeightingConfig::Stake(parse_stakes(&env::var("ORACLE_STAKES").unwrap_or_default()))
            }
            _ => WeightingConfig::Equal,
        };

        let interval_estimator = match env::var("INTERVAL_ESTIMATOR").as_deref() {
            Ok("stddev") => IntervalConfig::StdDev {
                z: env::var("CI_Z")
                    .ok()
                    .and_then(|v| v.parse::<f64>().ok())
                    .filter(|&v| v > 0.0)
                    .unwrap_or(1.645),
            },
            _ => IntervalConfig::Percentile {
                lo_q: env::var("CI_LO_Q")
                    .ok()
                    .and_then(|v| v.parse::<f64>().ok())
                    .filter(|&v| (0.0..=1.0).contains(&v))
                    .unwrap_or(0.10),
                hi_q: env::var("CI_HI_Q")
                    .ok()
                    .and_then(|v| v.parse::<f64>().ok())
                    .filter(|&v| (0.0..=1.0).contains(&v))
                    .unwrap_or(0.90),
            },
        };

        let audit_db_path =
            env::var("AUDIT_DB_PATH").unwrap_or_else(|_| "./m0_gateway_audit.db".to_string());

        let markets_bootstrap = env::var("MARKETS_BOOTSTRAP").ok().filter(|v| !v.is_empty());

        Ok(Self {
            bind_addr,
            feed_url,
            quorum_fraction,
            min_reveals,
            commit_window_secs,
            reveal_window_secs,
            deadline_sweep_secs,
            prediction_history_limit,
            fanout_buffer,
            weighting,
            interval_estimator,
            audit_db_path,
            markets_bootstrap,
        })
    }
}

/// Parse "oracle_a:2.0,oracle_b:1.5" into a weight map; bad entries are skipped.
fn parse_stakes(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|pair| {
            let (oracle, weight) = pair.split_once(':')?;
            let weight = weight.trim().parse::<f64>().ok()?;
            if weight <= 0.0 {
                return None;
            }
            Some((oracle.trim().to_string(), weight))
        })
        .collect()
}
