//! Operator endpoints: service principals and role assignments.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post, put},
};

use warden_auth::AuthorizationManager;
use warden_auth::engine::RoleGrant;
use warden_auth::permissions::builtin;
use warden_core::RoleAssignmentId;

use crate::app::dto::{
    RegisterServiceRequest, RotatedSecretResponse, ServicePrincipalView, UpdatePermissionsRequest,
};
use crate::app::{errors, services::AppServices};
use crate::middleware::{AuthState, auth_middleware};

pub fn router(manager: Arc<AuthorizationManager>) -> Router {
    let services = Router::new()
        .route("/services", post(register_service))
        .route("/services/:service_id/secret", post(rotate_secret))
        .route("/services/:service_id/permissions", put(update_permissions))
        .route("/services/:service_id/disable", post(disable_service))
        .route_layer(axum::middleware::from_fn_with_state(
            AuthState::requiring(manager.clone(), builtin::SERVICE_MANAGE),
            auth_middleware,
        ));

    let assignments = Router::new()
        .route("/role-assignments", post(grant_role))
        .route("/role-assignments/:assignment_id", delete(revoke_assignment))
        .route_layer(axum::middleware::from_fn_with_state(
            AuthState::requiring(manager, builtin::ROLE_ASSIGN),
            auth_middleware,
        ));

    services.merge(assignments)
}

/// POST /admin/services
///
/// The response carries the only copy of the client secret.
pub async fn register_service(
    Extension(services): Extension<Arc<AppServices>>,
    Json(request): Json<RegisterServiceRequest>,
) -> Response {
    match services
        .credentials
        .register(&request.service_id, request.permissions, request.force)
        .await
    {
        Ok(registration) => (StatusCode::CREATED, Json(registration)).into_response(),
        Err(e) => errors::credential_error(e),
    }
}

/// POST /admin/services/:service_id/secret
pub async fn rotate_secret(
    Extension(services): Extension<Arc<AppServices>>,
    Path(service_id): Path<String>,
) -> Response {
    match services.credentials.rotate_secret(&service_id).await {
        Ok(client_secret) => Json(RotatedSecretResponse {
            service_id,
            client_secret,
        })
        .into_response(),
        Err(e) => errors::credential_error(e),
    }
}

/// PUT /admin/services/:service_id/permissions
pub async fn update_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(service_id): Path<String>,
    Json(request): Json<UpdatePermissionsRequest>,
) -> Response {
    match services
        .credentials
        .update_permissions(&service_id, request.permissions)
        .await
    {
        Ok(principal) => Json(ServicePrincipalView::from(principal)).into_response(),
        Err(e) => errors::credential_error(e),
    }
}

/// POST /admin/services/:service_id/disable
pub async fn disable_service(
    Extension(services): Extension<Arc<AppServices>>,
    Path(service_id): Path<String>,
) -> Response {
    match services.credentials.disable(&service_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::credential_error(e),
    }
}

/// POST /admin/role-assignments
pub async fn grant_role(
    Extension(services): Extension<Arc<AppServices>>,
    Json(grant): Json<RoleGrant>,
) -> Response {
    match services.engine.grant_role(grant).await {
        Ok(assignment) => (StatusCode::CREATED, Json(assignment)).into_response(),
        Err(e) => errors::engine_error(e),
    }
}

/// DELETE /admin/role-assignments/:assignment_id
pub async fn revoke_assignment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(assignment_id): Path<String>,
) -> Response {
    let Ok(id) = assignment_id.parse::<RoleAssignmentId>() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "malformed assignment id");
    };
    match services.engine.revoke_assignment(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "assignment not found"),
        Err(e) => errors::engine_error(e),
    }
}
