//! HTTP handlers.
//!
//! Ingest and scale answer with a bare `success` or `fail` body; the dump
//! answers with JSON.

use axum::Json;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, warn};

use tilt_core::Reading;
use tilt_metrics::DEFAULT_MIN_SCORE;

use crate::ApiState;

const SUCCESS: &str = "success";
const FAIL: &str = "fail";

// ── Ingest ─────────────────────────────────────────────────────

/// Ingest form body: `data` holds the reading as a JSON document.
#[derive(Debug, Deserialize)]
pub struct IngestForm {
    pub data: String,
}

/// POST /send
pub async fn ingest(
    State(state): State<ApiState>,
    form: Result<Form<IngestForm>, FormRejection>,
) -> impl IntoResponse {
    let Form(form) = match form {
        Ok(form) => form,
        Err(e) => {
            warn!(error = %e, "ingest without a data field");
            return (StatusCode::BAD_REQUEST, FAIL);
        }
    };

    let reading = match Reading::from_json(&form.data) {
        Ok(reading) => reading,
        Err(e) => {
            warn!(error = %e, "rejected malformed reading");
            return (StatusCode::BAD_REQUEST, FAIL);
        }
    };

    if let Err(e) = state.store.record(reading) {
        error!(error = %e, "failed to record reading");
        return (StatusCode::INTERNAL_SERVER_ERROR, FAIL);
    }

    // The counter is a load signal; losing one increment is acceptable.
    if let Err(e) = state.store.touch(&state.instance_id) {
        warn!(error = %e, instance = %state.instance_id, "failed to bump load counter");
    }

    (StatusCode::OK, SUCCESS)
}

/// Any method other than POST on /send.
pub async fn wrong_method() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, FAIL)
}

// ── Dump ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct DumpParams {
    pub min_score: Option<i64>,
}

/// GET|POST /safe_dump?min_score=N
pub async fn safe_dump(
    State(state): State<ApiState>,
    params: Result<Query<DumpParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => {
            warn!(error = %e, "invalid dump parameters");
            return (StatusCode::BAD_REQUEST, FAIL).into_response();
        }
    };

    let min_score = params.min_score.unwrap_or(DEFAULT_MIN_SCORE);
    match state.aggregator.dump(min_score) {
        Ok(dump) => Json(dump).into_response(),
        Err(e) => {
            error!(error = %e, "dump failed");
            (StatusCode::INTERNAL_SERVER_ERROR, FAIL).into_response()
        }
    }
}

// ── Scaling ────────────────────────────────────────────────────

/// Scale form body.
#[derive(Debug, Deserialize)]
pub struct ScaleForm {
    pub instances: String,
}

/// POST /scale
pub async fn scale(
    State(state): State<ApiState>,
    form: Result<Form<ScaleForm>, FormRejection>,
) -> impl IntoResponse {
    let target = match form
        .ok()
        .and_then(|Form(form)| form.instances.trim().parse::<i64>().ok())
    {
        Some(target) => target,
        None => {
            warn!("scale request without an integer instance count");
            return (StatusCode::BAD_REQUEST, FAIL);
        }
    };

    match state.gate.request_scale(target).await {
        Ok(decision) if decision.is_accepted() => (StatusCode::OK, SUCCESS),
        Ok(_) => (StatusCode::OK, FAIL),
        Err(e) => {
            error!(error = %format!("{e:#}"), requested = target, "scale executor failed");
            (StatusCode::BAD_GATEWAY, FAIL)
        }
    }
}

// ── Observability ──────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> Response {
    match state.store.load_snapshot() {
        Ok(snapshot) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            tilt_metrics::render_prometheus(&snapshot),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "load snapshot failed");
            (StatusCode::INTERNAL_SERVER_ERROR, FAIL).into_response()
        }
    }
}

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.ping() {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            error!(error = %e, "store ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}
