use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::chain::ChainHead;
use crate::fanout::FanoutHub;
use crate::ledger::EpochLedger;
use crate::metrics::GatewayMetrics;
use crate::models::{EpochMeta, Market, Prediction};
use crate::registry::MarketRegistry;
use crate::store::PredictionStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MarketRegistry>,
    pub ledger: Arc<EpochLedger>,
    pub store: Arc<PredictionStore>,
    pub hub: Arc<FanoutHub>,
    pub metrics: Arc<GatewayMetrics>,
    pub head: Arc<ChainHead>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/markets", get(list_markets))
        .route("/epochs", get(list_epochs))
        .route("/predictions/:market_id/latest", get(latest_prediction))
        .route("/metrics", get(metrics_text))
        .route("/ws", get(super::ws::ws_handler))
        .layer(axum::middleware::from_fn(super::middleware::request_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

/// Liveness only; says nothing about data freshness
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

async fn list_markets(State(state): State<AppState>) -> Json<Vec<Market>> {
    Json(state.registry.snapshot())
}

async fn list_epochs(State(state): State<AppState>) -> Json<Vec<EpochMeta>> {
    Json(state.ledger.epoch_snapshots())
}

async fn latest_prediction(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
) -> Result<Json<Prediction>, ApiError> {
    state
        .store
        .latest(&market_id)
        .map(|p| Json((*p).clone()))
        .ok_or_else(|| ApiError::NotFound(format!("No prediction published for {market_id}")))
}

async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    #[allow(dead_code)] // Reserved for fallible read paths
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
