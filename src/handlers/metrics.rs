use axum::{http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};
use tracing::error;

// Prometheus text exposition of everything registered in the default registry
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(%err, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }

    match String::from_utf8(buffer) {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            error!(%err, "metrics are not valid utf-8");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
