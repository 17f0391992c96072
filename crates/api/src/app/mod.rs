//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: key store, repositories and the auth services
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses, including the 401/403 mapping

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, Stores, build_services};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .merge(routes::public_router())
        .merge(routes::router(services.manager.clone()))
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
