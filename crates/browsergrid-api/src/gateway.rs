//! API Gateway: binds the control-plane router to a TCP listener.

use std::net::SocketAddr;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes::create_router;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub cors_permissive: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_permissive: false,
        }
    }
}

pub struct ApiGateway {
    config: GatewayConfig,
    app_state: AppState,
}

impl ApiGateway {
    #[must_use]
    pub fn new(config: GatewayConfig, app_state: AppState) -> Self {
        Self { config, app_state }
    }

    #[must_use]
    pub fn build_router(&self) -> Router {
        let cors = if self.config.cors_permissive {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            CorsLayer::new()
        };

        create_router(self.app_state.clone()).layer(TraceLayer::new_for_http()).layer(cors)
    }

    /// # Errors
    /// Returns an error if the server fails to bind or start.
    pub async fn serve(self) -> std::io::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .expect("invalid bind address");

        let router = self.build_router();
        info!(%addr, "starting BrowserGrid API gateway");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_config_default_binds_all_interfaces_on_8080() {
        let config = GatewayConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }
}
