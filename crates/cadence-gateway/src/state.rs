use cadence_core::config::GatewayConfig;
use cadence_engine::CadenceEngine;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub engine: CadenceEngine,
}
