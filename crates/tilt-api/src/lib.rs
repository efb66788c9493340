//! tilt-api — HTTP surface for Tiltgrid.
//!
//! Responses keep the plain-text `success` / `fail` contract the sensor
//! clients and the dashboard already speak.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/send` | Ingest one reading (form field `data`, JSON) |
//! | GET, POST | `/safe_dump` | Readings since `?min_score=` plus live instances |
//! | POST | `/scale` | Request an instance count (form field `instances`) |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Store reachability |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tilt_autoscale::ScaleGate;
use tilt_metrics::RangeAggregator;
use tilt_state::TelemetryStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: TelemetryStore,
    pub aggregator: RangeAggregator,
    pub gate: Arc<ScaleGate>,
    /// Name this process counts its requests under.
    pub instance_id: String,
}

impl ApiState {
    pub fn new(store: TelemetryStore, gate: ScaleGate, instance_id: impl Into<String>) -> Self {
        Self {
            aggregator: RangeAggregator::new(store.clone()),
            store,
            gate: Arc::new(gate),
            instance_id: instance_id.into(),
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/send",
            post(handlers::ingest).fallback(handlers::wrong_method),
        )
        .route(
            "/safe_dump",
            get(handlers::safe_dump).post(handlers::safe_dump),
        )
        .route("/scale", post(handlers::scale))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
