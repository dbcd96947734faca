//! Market registry: catalog of known markets.
//!
//! Updated by administrative `market_upsert` events from the feed, never by
//! the aggregation path. Optionally bootstrapped at startup from a JSON
//! catalog (URL or file).

use std::collections::HashMap;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::info;

use crate::models::Market;

#[derive(Default)]
pub struct MarketRegistry {
    markets: RwLock<HashMap<String, Market>>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, market: Market) {
        self.markets
            .write()
            .insert(market.market_id.clone(), market);
    }

    pub fn get(&self, market_id: &str) -> Option<Market> {
        self.markets.read().get(market_id).cloned()
    }

    pub fn contains(&self, market_id: &str) -> bool {
        self.markets.read().contains_key(market_id)
    }

    pub fn len(&self) -> usize {
        self.markets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.read().is_empty()
    }

    /// Catalog snapshot for /markets, ordered by market id.
    pub fn snapshot(&self) -> Vec<Market> {
        let mut markets: Vec<Market> = self.markets.read().values().cloned().collect();
        markets.sort_by(|a, b| a.market_id.cmp(&b.market_id));
        markets
    }

    /// Load an initial catalog from a JSON array of markets, fetched over
    /// HTTP or read from a local file. Returns how many were loaded.
    pub async fn bootstrap(&self, source: &str) -> Result<usize> {
        let markets: Vec<Market> = if source.starts_with("http://") || source.starts_with("https://")
        {
            reqwest::get(source)
                .await
                .with_context(|| format!("Failed to fetch market catalog from {source}"))?
                .error_for_status()
                .context("Market catalog fetch returned an error status")?
                .json()
                .await
                .context("Market catalog response is not a JSON market array")?
        } else {
            let raw = std::fs::read_to_string(source)
                .with_context(|| format!("Failed to read market catalog file {source}"))?;
            serde_json::from_str(&raw).context("Market catalog file is not a JSON market array")?
        };

        let count = markets.len();
        for market in markets {
            self.upsert(market);
        }
        info!(count, source, "market catalog bootstrapped");
        Ok(count)
    }
}
