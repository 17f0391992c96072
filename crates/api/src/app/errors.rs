use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use warden_auth::{AuthFailure, CredentialError, EngineError, SessionError};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn internal_error(context: &'static str, err: &dyn std::error::Error) -> Response {
    tracing::error!(error = %err, "{context}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
}

/// Every authentication or authorization failure leaves through here.
pub fn auth_failure(failure: AuthFailure) -> Response {
    let message = failure.public_message();
    match failure {
        AuthFailure::AuthenticationRequired(_) => {
            let mut response = json_error(StatusCode::UNAUTHORIZED, "unauthorized", message);
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            response
        }
        AuthFailure::AuthorizationDenied { .. } => {
            json_error(StatusCode::FORBIDDEN, "forbidden", message)
        }
    }
}

pub fn credential_error(err: CredentialError) -> Response {
    match err {
        CredentialError::InvalidCredentials => json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client authentication failed",
        ),
        CredentialError::AlreadyRegistered(service_id) => json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("service '{service_id}' is already registered"),
        ),
        CredentialError::NotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "service not found")
        }
        CredentialError::InvalidServiceId(reason) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_request", reason)
        }
        other => internal_error("service credential operation failed", &other),
    }
}

pub fn session_error(err: SessionError) -> Response {
    match err {
        SessionError::Token(e) => {
            tracing::info!(kind = e.kind(), "refresh token rejected");
            auth_failure(AuthFailure::from(e))
        }
        SessionError::UserUnavailable => json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Authentication required",
        ),
        other => internal_error("session operation failed", &other),
    }
}

pub fn engine_error(err: EngineError) -> Response {
    match err {
        EngineError::UnknownRole(_) => {
            json_error(StatusCode::BAD_REQUEST, "unknown_role", "role does not exist")
        }
        EngineError::InvalidAssignment(e) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        other => internal_error("authorization engine failed", &other),
    }
}

#[cfg(test)]
mod tests {
    use warden_auth::{Permission, RepositoryError, TokenError};
    use warden_core::RoleId;

    use super::*;

    #[test]
    fn auth_failures_map_to_401_and_403() {
        let response = auth_failure(AuthFailure::from(TokenError::SignatureInvalid));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );

        let response = auth_failure(AuthFailure::AuthorizationDenied {
            permission: Permission::new("a:b:edit"),
        });
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn credential_errors_keep_oauth_semantics() {
        assert_eq!(
            credential_error(CredentialError::InvalidCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            credential_error(CredentialError::AlreadyRegistered("billing".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            credential_error(CredentialError::Repository(RepositoryError::Unavailable(
                "down".into()
            )))
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unknown_user_on_refresh_is_unauthenticated() {
        assert_eq!(
            session_error(SessionError::UserUnavailable).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            session_error(SessionError::Token(TokenError::TokenExpired)).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn grant_of_unknown_role_is_a_bad_request() {
        assert_eq!(
            engine_error(EngineError::UnknownRole(RoleId::new())).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
