//! Relay error taxonomy and its wire representation.
//!
//! Every failure a caller can observe maps onto one variant here, and the
//! HTTP layer renders all of them through the same JSON envelope. Internal
//! detail stays in the logs; callers only see the catalog messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::token::ExchangeError;

/// Error surfaced by the relay pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The caller's API key did not match the configured key.
    #[error("invalid API key")]
    InvalidApiKey,

    /// The requested model is not in the allowed list.
    #[error("model not allowed: {0}")]
    InvalidModel(String),

    /// Every pool member was tried and failed, or the pool is empty.
    #[error("no accounts available")]
    NoAccountsAvailable,

    /// The sole remaining account could not produce a token.
    #[error("token refresh failed for account {account}: {source}")]
    TokenRefresh {
        account: String,
        #[source]
        source: ExchangeError,
    },

    /// The inference endpoint returned a non-2xx status or a transport error.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// The caller's body was not usable (not JSON, or missing fields).
    #[error("malformed request payload: {0}")]
    Payload(String),
}

/// Wire envelope shared by every error response.
#[derive(Serialize)]
struct ErrorResponse {
    r#type: &'static str,
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    r#type: &'static str,
    message: &'static str,
}

fn error_response(status: StatusCode, kind: &'static str, message: &'static str) -> Response {
    let body = ErrorResponse {
        r#type: "error",
        error: ErrorBody {
            r#type: kind,
            message,
        },
    };
    (status, Json(body)).into_response()
}

impl RelayError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidApiKey => StatusCode::FORBIDDEN,
            RelayError::InvalidModel(_) => StatusCode::BAD_REQUEST,
            RelayError::NoAccountsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::TokenRefresh { .. } | RelayError::Upstream(_) | RelayError::Payload(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn wire_kind(&self) -> &'static str {
        match self {
            RelayError::InvalidApiKey => "permission_error",
            RelayError::InvalidModel(_) => "invalid_model",
            RelayError::NoAccountsAvailable => "service_unavailable",
            RelayError::TokenRefresh { .. } | RelayError::Upstream(_) | RelayError::Payload(_) => {
                "internal_error"
            }
        }
    }

    fn wire_message(&self) -> &'static str {
        match self {
            RelayError::InvalidApiKey => "Invalid API key.",
            RelayError::InvalidModel(_) => "The specified model is not in the allowed list.",
            RelayError::NoAccountsAvailable => "No available accounts. Please try again later.",
            RelayError::TokenRefresh { .. } | RelayError::Upstream(_) | RelayError::Payload(_) => {
                "An internal error occurred. Please try again later."
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        error_response(self.status(), self.wire_kind(), self.wire_message())
    }
}

/// Response for any path or method the router does not know.
pub fn not_found_response() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        "The requested resource was not found.",
    )
}
