use cadence_core::config::GatewayConfig;

/// Bearer check against the configured token. With no token configured
/// every caller is accepted.
pub fn validate_auth(config: &GatewayConfig, bearer: Option<&str>) -> bool {
    match config.token.as_deref() {
        Some(expected) => bearer == Some(expected),
        None => true,
    }
}
