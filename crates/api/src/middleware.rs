use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use warden_auth::{AuthFailure, AuthorizationManager, Permission, TokenError};

use crate::app::errors;
use crate::context::PrincipalContext;

/// Interceptor state: the manager plus the permission a route group demands.
#[derive(Clone)]
pub struct AuthState {
    pub manager: Arc<AuthorizationManager>,
    pub required: Option<Permission>,
}

impl AuthState {
    /// Any authenticated principal passes.
    pub fn authenticated(manager: Arc<AuthorizationManager>) -> Self {
        Self {
            manager,
            required: None,
        }
    }

    pub fn requiring(manager: Arc<AuthorizationManager>, permission: Permission) -> Self {
        Self {
            manager,
            required: Some(permission),
        }
    }
}

/// Runs [`AuthorizationManager::authorize`] (or `authenticate` for routes
/// without a permission) and attaches a [`PrincipalContext`], or answers
/// 401/403.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let token = match extract_bearer(req.headers()) {
        Ok(token) => token.map(str::to_owned),
        Err(e) => {
            tracing::info!(kind = e.kind(), "authentication failed");
            return errors::auth_failure(AuthFailure::from(e));
        }
    };

    let outcome = match &state.required {
        Some(permission) => state.manager.authorize(token.as_deref(), permission).await,
        None => state.manager.authenticate(token.as_deref()).await,
    };

    match outcome {
        Ok(principal) => {
            req.extensions_mut().insert(PrincipalContext::new(principal));
            next.run(req).await
        }
        Err(failure) => errors::auth_failure(failure),
    }
}

/// `Ok(None)` when no Authorization header is present at all.
fn extract_bearer(headers: &HeaderMap) -> Result<Option<&str>, TokenError> {
    let Some(header) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };

    let header = header
        .to_str()
        .map_err(|_| TokenError::MalformedToken("authorization header is not ascii".to_string()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| TokenError::MalformedToken("expected a bearer token".to_string()))?
        .trim();

    if token.is_empty() {
        return Err(TokenError::MissingToken);
    }

    Ok(Some(token))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, header::AUTHORIZATION};

    use super::*;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(extract_bearer(&headers("Bearer abc.def")).unwrap(), Some("abc.def"));
        assert_eq!(extract_bearer(&HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn rejects_other_schemes_and_blank_tokens() {
        assert!(matches!(
            extract_bearer(&headers("Basic dXNlcjpwdw==")),
            Err(TokenError::MalformedToken(_))
        ));
        assert_eq!(
            extract_bearer(&headers("Bearer   ")).unwrap_err(),
            TokenError::MissingToken
        );
    }
}
