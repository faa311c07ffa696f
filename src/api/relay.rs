//! Relay request handlers.
//!
//! Both inference endpoints share one pipeline: authenticate, resolve the
//! requested model, lease an access token from the pool, dispatch upstream,
//! and stream the body back without buffering it.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum::extract::State;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::models::ResolvedModel;
use crate::payload;
use crate::upstream;

use super::routes::AppState;

/// Pinned Vertex API version; replaces the model field in messages bodies.
const ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream; charset=UTF-8";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

/// Verify the `x-api-key` header used by the messages endpoint.
fn verify_api_key(headers: &HeaderMap, expected: &str) -> Result<(), RelayError> {
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(presented, expected) {
        Ok(())
    } else {
        Err(RelayError::InvalidApiKey)
    }
}

/// Verify the Authorization bearer token used by the chat endpoints.
fn verify_bearer(headers: &HeaderMap, expected: &str) -> Result<(), RelayError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if constant_time_eq(presented, expected) {
        Ok(())
    } else {
        Err(RelayError::InvalidApiKey)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// POST /v1/messages
// ─────────────────────────────────────────────────────────────────────────────

/// Anthropic-style messages endpoint.
///
/// The body is rewritten into the Vertex shape before dispatch: the model
/// field becomes the pinned `anthropic_version`, and the conversation is
/// normalized to alternating roles.
pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    verify_api_key(&headers, &state.api_key)?;

    let mut request: Value = serde_json::from_slice(&body)
        .map_err(|e| RelayError::Payload(format!("invalid JSON body: {e}")))?;
    let model = request
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::Payload("missing model field".to_string()))?
        .to_string();
    let resolved = state.models.resolve(&model)?;

    let request_id = Uuid::new_v4();
    info!(
        request_id = %request_id,
        model = %model,
        backend_model = %resolved.backend_model,
        "Relaying messages request"
    );

    let object = request
        .as_object_mut()
        .ok_or_else(|| RelayError::Payload("body is not a JSON object".to_string()))?;
    object.insert(
        "anthropic_version".to_string(),
        Value::String(ANTHROPIC_VERSION.to_string()),
    );
    object.remove("model");
    let messages = match object.remove("messages") {
        Some(Value::Array(messages)) => messages,
        _ => return Err(RelayError::Payload("missing messages array".to_string())),
    };
    object.insert(
        "messages".to_string(),
        Value::Array(payload::normalize_messages(messages)),
    );

    let response = dispatch_upstream(&state, &resolved, &request, request_id).await?;
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(JSON_CONTENT_TYPE)
        .to_string();
    Ok(stream_response(response, &content_type, request_id))
}

// ─────────────────────────────────────────────────────────────────────────────
// POST /api/chat and /v1/chat/completions
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-style chat completions endpoint.
///
/// The body is forwarded untouched; only the response content type is set,
/// based on whether the caller asked for a stream.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    verify_bearer(&headers, &state.api_key)?;

    let request: Value = serde_json::from_slice(&body)
        .map_err(|e| RelayError::Payload(format!("invalid JSON body: {e}")))?;
    let model = request
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::Payload("missing model field".to_string()))?
        .to_string();
    let wants_stream = request
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let resolved = state.models.resolve(&model)?;

    let request_id = Uuid::new_v4();
    info!(
        request_id = %request_id,
        model = %model,
        stream = wants_stream,
        "Relaying chat request"
    );

    let response = dispatch_upstream(&state, &resolved, &request, request_id).await?;
    let content_type = if wants_stream {
        EVENT_STREAM_CONTENT_TYPE
    } else {
        JSON_CONTENT_TYPE
    };
    Ok(stream_response(response, content_type, request_id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Lease a token, pick a region, and send the request upstream.
async fn dispatch_upstream(
    state: &AppState,
    resolved: &ResolvedModel,
    body: &Value,
    request_id: Uuid,
) -> Result<reqwest::Response, RelayError> {
    let lease = state.pool.acquire(state.exchanger.as_ref()).await?;
    let location = state.models.choose_location(&resolved.base)?;
    let url = upstream::endpoint_url(
        state.endpoint_base.as_deref(),
        &location,
        &lease.project_id,
        &resolved.backend_model,
    );
    debug!(
        request_id = %request_id,
        account = %lease.account_id,
        location = %location,
        url = %url,
        "Dispatching upstream"
    );

    let result = upstream::dispatch(&state.upstream, &url, &lease.access_token, body).await;
    // Every request that got as far as holding a token advances the rotation
    // cadence, even when the upstream call failed.
    state.pool.record_dispatch().await;

    match result {
        Ok(response) => Ok(response),
        Err(e) => {
            warn!(
                request_id = %request_id,
                account = %lease.account_id,
                error = %e,
                "Upstream dispatch failed"
            );
            state.pool.clear_tokens().await;
            Err(e)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response streaming
// ─────────────────────────────────────────────────────────────────────────────

/// Forward the upstream body as-is, logging mid-stream failures.
fn stream_response(response: reqwest::Response, content_type: &str, request_id: Uuid) -> Response {
    let stream = response.bytes_stream().inspect(move |chunk| {
        if let Err(e) = chunk {
            warn!(request_id = %request_id, error = %e, "Upstream stream failed mid-body");
        }
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            warn!(request_id = %request_id, error = %e, "Failed to build relay response");
            RelayError::Upstream("failed to build response".to_string()).into_response()
        })
}
