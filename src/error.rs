use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Everything that can go wrong between the inbound request and the upstream answer.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Upstream attempt timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Upstream returned HTTP {status}")]
    UpstreamHttp { status: u16 },

    #[error("Upstream request failed: {0}")]
    UpstreamTransport(String),

    #[error("Upstream reported failure: {0}")]
    UpstreamRejected(String),

    #[error("Upstream payload did not match the expected shape: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate store error: {0}")]
    RateStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Failures worth another attempt against the upstream.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamTimeout(_)
                | GatewayError::UpstreamHttp { .. }
                | GatewayError::UpstreamTransport(_)
        )
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RateLimited => "rate_limited",
            GatewayError::UpstreamTimeout(_) => "timeout",
            GatewayError::UpstreamHttp { .. } => "http",
            GatewayError::UpstreamTransport(_) => "transport",
            GatewayError::UpstreamRejected(_) => "rejected",
            GatewayError::Parse(_) => "parse",
            GatewayError::Config(_) => "config",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::RateStore(_) => "rate_store",
            GatewayError::Io(_) => "io",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the caller gets to see. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::RateLimited => "Rate limit exceeded".to_string(),
            GatewayError::BadRequest(msg) => msg.clone(),
            GatewayError::Parse(_) => "Upstream returned an unexpected payload".to_string(),
            _ => "Internal Server Error".to_string(),
        }
    }
}

/// JSON body of every error response: `{"error": "..."}`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), err = %self, "request failed");
        } else {
            warn!(kind = self.kind(), err = %self, "request rejected");
        }

        let body = ErrorBody {
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
