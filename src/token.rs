//! Access-token exchange against the Google identity endpoints.
//!
//! Two grant flows are supported, one per credential kind: a plain OAuth
//! refresh-token exchange, and an RS256-signed service-account assertion.
//! Both flows carry a 10 second timeout and report the provider's expiry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::accounts::AccountCredential;

/// Token endpoint for OAuth refresh-token grants.
pub const OAUTH_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";

/// Scope requested by service-account assertions.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Per-request timeout for either grant flow.
pub const REFRESH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Lifetime claimed by service-account assertions.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Longest slice of an error body carried into logs and error messages.
const SNIPPET_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token endpoint request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {snippet}")]
    Endpoint { status: u16, snippet: String },

    #[error("token response was not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("token response missing access_token")]
    MissingAccessToken,

    #[error("token response missing expires_in")]
    MissingExpiry,

    #[error("could not sign service-account assertion: {0}")]
    Assertion(#[from] jsonwebtoken::errors::Error),
}

/// A freshly exchanged bearer token plus the provider-reported expiry.
#[derive(Debug, Clone)]
pub struct FreshToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Exchange a stored credential for a fresh access token.
///
/// The account pool depends on this seam instead of a concrete client so
/// rotation logic can be exercised without a token endpoint.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, credential: &AccountCredential) -> Result<FreshToken, ExchangeError>;
}

/// Production exchanger speaking to the Google token endpoints.
#[derive(Debug, Clone)]
pub struct GoogleTokenExchanger {
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct RefreshTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    grant_type: &'a str,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

impl GoogleTokenExchanger {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn exchange_refresh_token(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<FreshToken, ExchangeError> {
        debug!(grant = "refresh_token", "Exchanging credential for access token");
        let body = RefreshTokenRequest {
            client_id,
            client_secret,
            refresh_token,
            grant_type: "refresh_token",
        };
        let resp = self
            .http
            .post(OAUTH_TOKEN_URL)
            .timeout(REFRESH_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        parse_token_response(status, &text)
    }

    async fn exchange_service_account(
        &self,
        client_email: &str,
        private_key: &str,
        token_uri: &str,
    ) -> Result<FreshToken, ExchangeError> {
        debug!(grant = "jwt-bearer", "Exchanging credential for access token");
        let assertion = build_assertion(client_email, private_key, token_uri, Utc::now())?;
        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];
        let resp = self
            .http
            .post(token_uri)
            .timeout(REFRESH_TIMEOUT)
            .form(&params)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        parse_token_response(status, &text)
    }
}

#[async_trait]
impl TokenExchanger for GoogleTokenExchanger {
    async fn exchange(&self, credential: &AccountCredential) -> Result<FreshToken, ExchangeError> {
        match credential {
            AccountCredential::OAuthRefresh {
                client_id,
                client_secret,
                refresh_token,
                ..
            } => {
                self.exchange_refresh_token(client_id, client_secret, refresh_token)
                    .await
            }
            AccountCredential::ServiceAccount {
                client_email,
                private_key,
                token_uri,
                ..
            } => {
                self.exchange_service_account(client_email, private_key, token_uri)
                    .await
            }
        }
    }
}

/// Sign the jwt-bearer assertion for a service-account key.
fn build_assertion(
    client_email: &str,
    private_key: &str,
    token_uri: &str,
    now: DateTime<Utc>,
) -> Result<String, ExchangeError> {
    let iat = now.timestamp();
    let claims = AssertionClaims {
        iss: client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())?;
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &claims,
        &key,
    )?)
}

/// Interpret a token endpoint reply.
///
/// Non-2xx replies surface a truncated body snippet. Success replies must
/// carry a non-empty `access_token` and a positive `expires_in`.
fn parse_token_response(status: u16, body: &str) -> Result<FreshToken, ExchangeError> {
    if !(200..300).contains(&status) {
        return Err(ExchangeError::Endpoint {
            status,
            snippet: snippet_of(body),
        });
    }

    let parsed: TokenEndpointResponse = serde_json::from_str(body)?;
    let access_token = parsed
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or(ExchangeError::MissingAccessToken)?;
    let expires_in = parsed
        .expires_in
        .filter(|secs| *secs > 0)
        .ok_or(ExchangeError::MissingExpiry)?;

    Ok(FreshToken {
        access_token,
        expires_at: Utc::now() + Duration::seconds(expires_in),
    })
}

fn snippet_of(body: &str) -> String {
    body.chars().take(SNIPPET_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let before = Utc::now();
        let token = parse_token_response(
            200,
            r#"{"access_token": "ya29.token", "expires_in": 3600, "token_type": "Bearer"}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "ya29.token");
        let lifetime = token.expires_at - before;
        assert!(lifetime >= Duration::seconds(3595) && lifetime <= Duration::seconds(3605));
    }

    #[test]
    fn test_parse_rejects_error_status() {
        let err = parse_token_response(400, r#"{"error": "invalid_grant"}"#).unwrap_err();
        match err {
            ExchangeError::Endpoint { status, snippet } => {
                assert_eq!(status, 400);
                assert!(snippet.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_requires_access_token() {
        let err = parse_token_response(200, r#"{"expires_in": 3600}"#).unwrap_err();
        assert!(matches!(err, ExchangeError::MissingAccessToken));

        let err = parse_token_response(200, r#"{"access_token": "", "expires_in": 3600}"#)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::MissingAccessToken));
    }

    #[test]
    fn test_parse_requires_expiry() {
        let err = parse_token_response(200, r#"{"access_token": "tok"}"#).unwrap_err();
        assert!(matches!(err, ExchangeError::MissingExpiry));

        let err = parse_token_response(200, r#"{"access_token": "tok", "expires_in": 0}"#)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::MissingExpiry));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse_token_response(200, "<html>proxy error</html>").unwrap_err();
        assert!(matches!(err, ExchangeError::Malformed(_)));
    }

    #[test]
    fn test_error_snippet_is_truncated() {
        let body = "x".repeat(5000);
        let err = parse_token_response(502, &body).unwrap_err();
        match err {
            ExchangeError::Endpoint { snippet, .. } => assert_eq!(snippet.len(), SNIPPET_LIMIT),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_assertion_rejects_invalid_key() {
        let err = build_assertion(
            "svc@project.iam.gserviceaccount.com",
            "not a pem key",
            "https://oauth2.googleapis.com/token",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ExchangeError::Assertion(_)));
    }
}
