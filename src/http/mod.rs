//! HTTP surfaces: the sidecar service and an embeddable middleware.

mod middleware;
mod server;
mod service;

pub use middleware::{enforce_limit, LimitLayerState};
pub use server::HttpServer;
pub use service::{router, ApiError, ErrorBody};
