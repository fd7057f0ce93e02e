use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use cadence_core::config::GatewayConfig;
use cadence_engine::CadenceEngine;

use crate::routes;
use crate::state::AppState;

/// The API routes over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/executions", post(routes::run_execution))
        .route("/api/executions/{id}", get(routes::execution_status))
        .route("/api/users/{owner}/poll", post(routes::poll_user))
        .route("/api/cancel", post(routes::cancel))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    engine: CadenceEngine,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, engine: CadenceEngine) -> Self {
        Self { config, engine }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            engine: self.engine.clone(),
        });
        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
