//! Router assembly and server lifecycle.

use std::sync::Arc;

use axum::{routing::post, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::accounts::AccountPool;
use crate::config::Config;
use crate::error;
use crate::models::ModelTable;
use crate::token::{GoogleTokenExchanger, TokenExchanger};

use super::relay;

/// Shared application state.
pub struct AppState {
    /// Key callers must present on every request
    pub api_key: String,
    /// Rotation core shared by every request
    pub pool: AccountPool,
    /// Allowed models and their serving locations
    pub models: ModelTable,
    /// Credential-to-token exchange
    pub exchanger: Arc<dyn TokenExchanger>,
    /// Shared client for upstream calls
    pub upstream: reqwest::Client,
    /// Upstream origin override
    pub endpoint_base: Option<String>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        let http = reqwest::Client::new();
        Self {
            api_key: config.api_key.clone(),
            pool: AccountPool::new(config.accounts.clone()),
            models: config.models.clone(),
            exchanger: Arc::new(GoogleTokenExchanger::new(http.clone())),
            upstream: http,
            endpoint_base: config.endpoint_base.clone(),
        }
    }
}

/// Build the relay router.
pub fn router(state: Arc<AppState>) -> Router {
    // The chat endpoints are called from browsers, so they answer CORS
    // preflights; the messages endpoint is server-to-server only. The
    // per-route fallbacks keep wrong-method requests on the 404 contract
    // instead of axum's default 405.
    let chat_routes = Router::new()
        .route(
            "/api/chat",
            post(relay::chat_completions).fallback(not_found),
        )
        .route(
            "/v1/chat/completions",
            post(relay::chat_completions).fallback(not_found),
        )
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/v1/messages", post(relay::messages).fallback(not_found))
        .merge(chat_routes)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> axum::response::Response {
    error::not_found_response()
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(&config));
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Setup graceful shutdown on SIGTERM/SIGINT
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for a shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
