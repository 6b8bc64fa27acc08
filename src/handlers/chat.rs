use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::identity::{Caller, session_cookie};
use crate::metrics::{REQUEST_LATENCY, REQUEST_TOTAL};
use crate::models::{ChatRequest, GenerationRequest};
use crate::rate_limit::RateDecision;
use crate::state::AppState;

/// Public message for a body that is not JSON or does not fit [`ChatRequest`].
const INVALID_BODY: &str = "Invalid request body";

// POST /api/chat: body check, rate gate, then the upstream
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    REQUEST_TOTAL.inc();
    let start_time = Instant::now();

    // A body that can never be forwarded is refused before it costs quota.
    let mut response = match generation_request(payload) {
        Ok(request) => gated(&state, &caller, request).await,
        Err(err) => err.into_response(),
    };

    if let Some(token) = caller.issued_token {
        if let Ok(cookie) = HeaderValue::from_str(&session_cookie(&token, state.session_max_age)) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
    response
}

async fn gated(state: &AppState, caller: &Caller, request: GenerationRequest) -> Response {
    let decision = state.gate.admit(&caller.identity).await;

    let mut response = if decision.allowed {
        debug!(caller = %caller.identity, turns = request.messages.len(), "forwarding to upstream");
        match state.forwarder.forward(request).await {
            Ok(bios) => Json(bios).into_response(),
            Err(err) => err.into_response(),
        }
    } else {
        info!(caller = %caller.identity, "rate limit exceeded");
        let mut response = GatewayError::RateLimited.into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(decision.reset_after.as_secs()));
        response
    };

    rate_headers(response.headers_mut(), &decision);
    response
}

fn generation_request(
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<GenerationRequest, GatewayError> {
    let Json(payload) = payload.map_err(|rejection| {
        debug!(status = %rejection.status(), detail = %rejection.body_text(), "unreadable chat body");
        GatewayError::BadRequest(INVALID_BODY.to_string())
    })?;
    payload.into_generation()
}

fn rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_at().timestamp()),
    );
}

// Anything but POST on /api/chat
pub async fn method_not_allowed(method: Method) -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        format!("Method {method} Not Allowed"),
    )
}
