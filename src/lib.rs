//! # Vertex Relay
//!
//! Credential-rotating gateway for Vertex AI generative model endpoints.
//!
//! This library provides:
//! - An Anthropic-style messages endpoint and OpenAI-style chat endpoints
//! - A rotating pool of backend accounts with cached access tokens
//! - Streaming passthrough of upstream response bodies
//!
//! ## Request Flow
//! 1. Authenticate the caller against the configured API key
//! 2. Resolve the requested model against the allowed list
//! 3. Lease an access token from the account pool
//! 4. Dispatch to the regional Vertex endpoint and stream the body back
//!
//! ## Modules
//! - `accounts`: account pool, rotation policy, and the token cache
//! - `api`: HTTP surface and request handlers
//! - `token`: credential-to-token exchange against the OAuth endpoints
//! - `models`: allowed-model table and version-suffix resolution
//! - `payload`: conversation normalization for the messages endpoint

pub mod accounts;
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod payload;
pub mod token;
pub mod upstream;

pub use accounts::{Account, AccountCredential, AccountPool};
pub use config::Config;
pub use error::RelayError;
