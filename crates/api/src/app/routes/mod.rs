use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use warden_auth::AuthorizationManager;

use crate::middleware::{AuthState, auth_middleware};

pub mod admin;
pub mod authz;
pub mod oauth;
pub mod system;

/// Endpoints that authenticate by other means than a bearer token.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/oauth/token", post(oauth::token))
        .route("/auth/refresh", post(oauth::refresh))
}

/// Endpoints behind the bearer-token middleware. Each group carries its own
/// gate so that decode and permission check are one manager call.
pub fn router(manager: Arc<AuthorizationManager>) -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route_layer(axum::middleware::from_fn_with_state(
            AuthState::authenticated(manager.clone()),
            auth_middleware,
        ))
        .nest("/authz", authz::router(manager.clone()))
        .nest("/admin", admin::router(manager))
}
