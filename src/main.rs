//! M0 Oracle Gateway service binary.
//!
//! Wires the feed ingestor, epoch ledger, prediction store, and fanout hub
//! together and serves the read-only query API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::watch, time::interval};
use tracing::{info, warn};

use m0_gateway::{
    aggregate::Aggregator,
    api::{create_router, AppState},
    chain::{ChainHead, EventIngestor, WsEventSource},
    config::Config,
    fanout::FanoutHub,
    ledger::{EpochLedger, LedgerConfig},
    metrics::GatewayMetrics,
    registry::MarketRegistry,
    store::{audit::AuditLog, PredictionStore},
};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("M0_LOG_JSON").ok().as_deref() == Some("1");
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;
    info!("starting m0-gateway");

    let metrics = Arc::new(GatewayMetrics::new());
    let head = Arc::new(ChainHead::new());
    let registry = Arc::new(MarketRegistry::new());

    let audit = if config.audit_db_path.is_empty() {
        None
    } else {
        match AuditLog::open(&config.audit_db_path) {
            Ok(log) => {
                info!(path = %config.audit_db_path, entries = log.len(), "audit log ready");
                Some(log)
            }
            Err(e) => {
                warn!("audit log disabled: {e:#}");
                None
            }
        }
    };

    let store = Arc::new(PredictionStore::with_audit(
        config.prediction_history_limit,
        audit,
    ));
    let hub = Arc::new(FanoutHub::new(config.fanout_buffer, metrics.clone()));
    let aggregator = Aggregator::from_config(&config.weighting, &config.interval_estimator);
    let ledger = Arc::new(EpochLedger::new(
        LedgerConfig {
            quorum_fraction: config.quorum_fraction,
            min_reveals: config.min_reveals,
            commit_window_secs: config.commit_window_secs,
            reveal_window_secs: config.reveal_window_secs,
        },
        aggregator,
        store.clone(),
        hub.clone(),
        metrics.clone(),
    ));

    if let Some(source) = &config.markets_bootstrap {
        if let Err(e) = registry.bootstrap(source).await {
            warn!("market catalog bootstrap failed (non-critical): {e:#}");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Feed ingestion runs on its own cancellable task; without a feed URL
    // the gateway serves stored state only (useful for local testing).
    let ingest_task = if config.feed_url.is_empty() {
        warn!("FEED_URL not set - ingestion disabled");
        None
    } else {
        let source = WsEventSource::new(config.feed_url.clone(), metrics.clone());
        let ingestor = EventIngestor::new(
            Box::new(source),
            ledger.clone(),
            registry.clone(),
            head.clone(),
            metrics.clone(),
        );
        Some(tokio::spawn(ingestor.run(shutdown_rx.clone())))
    };

    // Settle epochs whose reveal deadline has elapsed.
    {
        let ledger = ledger.clone();
        let mut shutdown = shutdown_rx.clone();
        let sweep_every = Duration::from_secs(config.deadline_sweep_secs);
        tokio::spawn(async move {
            let mut ticker = interval(sweep_every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => ledger.sweep_deadlines(chrono::Utc::now()),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    let state = AppState {
        registry,
        ledger,
        store,
        hub,
        metrics,
        head,
    };
    let app = create_router(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(bind = %config.bind_addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("Server error")?;

    // Close the feed subscription and drain in-flight events before exit.
    let _ = shutdown_tx.send(true);
    if let Some(task) = ingest_task {
        let _ = task.await;
    }
    info!("gateway stopped");
    Ok(())
}
