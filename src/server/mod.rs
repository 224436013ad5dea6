pub mod cors;
pub mod handlers;
pub mod state;
pub mod url_validation;

use crate::config::Config;
use axum::{Router, middleware, routing::get};
use state::AppState;
use std::time::Duration;
use tracing::{error, info};

/// How often expired channel tokens are swept out of the token store.
const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Build the router with every route and middleware.
pub fn router(state: AppState) -> Router {
    let relay_endpoint = state.config.relay_endpoint.clone();

    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::serve_metrics))
        .route(&relay_endpoint, get(handlers::relay::relay))
        .route(
            "/channel/{profile}/{channel}",
            get(handlers::channel::serve_channel),
        )
        .route("/extract", get(handlers::extract::extract_media))
        .route("/subtitle", get(handlers::subtitle::serve_subtitle))
        .with_state(state)
        .layer(cors::cors_layer())
        .layer(middleware::from_fn(cors::relay_headers))
}

/// Build the router from configuration (used by `start` and by tests).
pub async fn build_router(config: Config) -> Router {
    router(AppState::new(config))
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    // Create shared application state
    let state = AppState::new(config);
    let shutdown = state.shutdown.clone();

    info!(
        "Relay endpoint {} with {} origin profiles",
        state.config.relay_endpoint,
        state.profiles.len()
    );

    let tokens = state.tokens.clone();
    let sweep_stop = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TOKEN_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = sweep_stop.cancelled() => break,
                _ = interval.tick() => tokens.cleanup(),
            }
        }
    });

    let app = router(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("Server listening on http://{}", addr);

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down, aborting in-flight segment streams");
        shutdown.cancel();
    });

    if let Err(e) = serve.await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
