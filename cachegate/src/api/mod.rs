//! API module for the cachegate HTTP server

pub mod routes;
pub mod server;

pub use routes::{health_response, AppState, HealthResponse, StoreStatus};
pub use server::{router, ApiServer, ApiServerConfig};
