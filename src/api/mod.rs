//! HTTP transport: a thin axum layer over the platform service.
//!
//! Transport concerns only: routing, DTO shapes, status mapping.
//! Auth, TLS, and CORS live with the deployment in front of this
//! server.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;

use std::sync::Arc;

use crate::service::PlatformService;

/// Shared state for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub service: Arc<PlatformService>,
}
