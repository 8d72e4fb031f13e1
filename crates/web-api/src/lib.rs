//! HTTP 传输层：WebSocket / Bot WebSocket / SSE 端点与认证

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws_connection;

pub use auth::{AuthUser, JwtService};
pub use config::JwtConfig;
pub use routes::router;
pub use state::AppState;
