use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use once_cell::sync::Lazy;
use prometheus::{histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder};
use serde::Serialize;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static RECONCILE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("launchpad_reconcile_total", "Reconcile passes by controller and result"), &["controller", "result"]).expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static RECONCILE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("launchpad_reconcile_errors_total", "Failed reconcile passes by error class"), &["controller", "error"]).expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static RECONCILE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        histogram_opts!("launchpad_reconcile_duration_seconds", "Reconcile pass latency", vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["controller"],
    ).expect("metric definition is valid");
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() { return StatusCode::INTERNAL_SERVER_ERROR.into_response(); }
    ([("Content-Type", "text/plain; version=0.0.4")], buf).into_response()
}

#[derive(Serialize)]
pub struct HealthResponse { pub status: &'static str }

pub async fn health() -> Json<HealthResponse> { Json(HealthResponse { status: "ok" }) }

pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health))
}
