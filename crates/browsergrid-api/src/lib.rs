//! HTTP/REST control-plane surface for BrowserGrid (spec.md §6): axum
//! router, API-key auth middleware, and error-to-HTTP mapping.

pub mod auth;
pub mod error;
pub mod gateway;
pub mod pagination;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use gateway::{ApiGateway, GatewayConfig};
pub use state::AppState;
