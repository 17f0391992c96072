use std::sync::Arc;

use serde::Serialize;

use crate::Permission;
use crate::claims::{ClaimBody, TokenType};
use crate::error::TokenError;
use crate::validator::TokenValidator;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrincipalType {
    User,
    Service,
}

/// Normalized identity of the caller, valid for one request.
///
/// Built only by [`PrincipalDecoder`]; the raw token is kept for forwarding to
/// downstream services but never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestPrincipal {
    pub principal_type: PrincipalType,
    pub user_id: Option<String>,
    pub service_id: Option<String>,
    pub email: Option<String>,
    pub token: String,
    pub permissions_from_token: Vec<Permission>,
    /// Only present for service principals acting on behalf of a user.
    pub user_permissions: Option<Vec<Permission>>,
}

impl RequestPrincipal {
    pub fn is_service(&self) -> bool {
        self.principal_type == PrincipalType::Service
    }

    /// The user id for user principals, the service id for services.
    pub fn subject(&self) -> &str {
        match self.principal_type {
            PrincipalType::User => self.user_id.as_deref().unwrap_or_default(),
            PrincipalType::Service => self.service_id.as_deref().unwrap_or_default(),
        }
    }
}

impl core::fmt::Debug for RequestPrincipal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestPrincipal")
            .field("principal_type", &self.principal_type)
            .field("user_id", &self.user_id)
            .field("service_id", &self.service_id)
            .field("token", &"<redacted>")
            .field("permissions_from_token", &self.permissions_from_token)
            .field("user_permissions", &self.user_permissions)
            .finish_non_exhaustive()
    }
}

/// Turns a bearer token into a [`RequestPrincipal`].
///
/// Service tokens are tried first because they may embed user context; anything
/// else must be an access token. Refresh tokens are always rejected here.
#[derive(Clone)]
pub struct PrincipalDecoder {
    validator: Arc<TokenValidator>,
}

impl PrincipalDecoder {
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self { validator }
    }

    pub async fn decode(&self, raw: &str) -> Result<RequestPrincipal, TokenError> {
        let claims = self
            .validator
            .validate_with(raw, &[TokenType::Service, TokenType::Access])
            .await?;
        let token = raw.trim().to_string();

        let principal = match claims.body {
            ClaimBody::Service(service) => RequestPrincipal {
                principal_type: PrincipalType::Service,
                user_id: service.user_id,
                service_id: Some(claims.sub),
                email: None,
                token,
                permissions_from_token: service.permissions,
                user_permissions: service.user_permissions,
            },
            ClaimBody::Access(access) => RequestPrincipal {
                principal_type: PrincipalType::User,
                user_id: Some(claims.sub),
                service_id: None,
                email: Some(access.email).filter(|e| !e.is_empty()),
                token,
                permissions_from_token: access.permissions,
                user_permissions: None,
            },
            ClaimBody::Refresh(_) => {
                return Err(TokenError::WrongTokenType {
                    expected: "service|access".to_string(),
                    actual: TokenType::Refresh.as_str().to_string(),
                });
            }
        };
        Ok(principal)
    }
}
