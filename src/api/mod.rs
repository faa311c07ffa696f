//! HTTP API for the relay.
//!
//! ## Endpoints
//!
//! - `POST /v1/messages` - Anthropic-style messages, authenticated via `x-api-key`
//! - `POST /api/chat` - OpenAI-style chat completions, authenticated via bearer token
//! - `POST /v1/chat/completions` - Alias for `/api/chat`
//!
//! Every other path and method returns a JSON not-found error.

mod relay;
mod routes;

pub use routes::{router, serve, AppState};
