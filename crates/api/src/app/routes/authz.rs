//! Resource-level decisions evaluated against the RBAC graph and ABAC policies.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    response::{IntoResponse, Response},
    routing::post,
};

use warden_auth::{AccessRequest, AuthorizationManager};
use warden_auth::permissions::builtin;

use crate::app::{errors, services::AppServices};
use crate::middleware::{AuthState, auth_middleware};

pub fn router(manager: Arc<AuthorizationManager>) -> Router {
    Router::new()
        .route("/decisions", post(decide))
        .route_layer(axum::middleware::from_fn_with_state(
            AuthState::requiring(manager, builtin::AUTHZ_DECISION_CHECK),
            auth_middleware,
        ))
}

/// POST /authz/decisions
///
/// A denial is a normal 200 answer; only engine failures are errors.
pub async fn decide(
    Extension(services): Extension<Arc<AppServices>>,
    Json(request): Json<AccessRequest>,
) -> Response {
    match services.engine.check_permission(&request).await {
        Ok(decision) => {
            tracing::debug!(
                user_id = %request.user_id,
                permission = %request.permission,
                allowed = decision.allowed,
                "decision evaluated"
            );
            Json(decision).into_response()
        }
        Err(e) => errors::engine_error(e),
    }
}
