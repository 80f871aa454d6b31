//! Portal gateway: the server side of the science portal.
//!
//! Resolves the deployment's auth mode once, forwards each caller's cookie
//! or bearer token to the login, workload (SKAHA) and storage (VOSpace)
//! services, and reshapes their answers into a uniform JSON envelope.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod envelope;
pub mod error;
pub mod health;
pub mod http_server;
pub mod oidc;
pub mod platform_load;
pub mod sessions;
pub mod state;
pub mod storage;
pub mod upstream;
pub mod vospace;

pub use config::{AuthMode, GatewayConfig};
pub use error::ApiError;
pub use http_server::{build_router, run_server};
pub use state::AppState;
