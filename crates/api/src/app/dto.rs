use serde::{Deserialize, Serialize};

use warden_auth::{Permission, PrincipalType, RequestPrincipal};

// -------------------------
// Request DTOs
// -------------------------

/// Form body of `POST /oauth/token`.
#[derive(Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub audience: Option<String>,
}

impl core::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterServiceRequest {
    pub service_id: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Replace an existing registration instead of failing with 409.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionsRequest {
    pub permissions: Vec<Permission>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    pub principal_type: PrincipalType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub permissions: Vec<Permission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_permissions: Option<Vec<Permission>>,
}

impl From<&RequestPrincipal> for WhoAmIResponse {
    fn from(principal: &RequestPrincipal) -> Self {
        Self {
            principal_type: principal.principal_type,
            user_id: principal.user_id.clone(),
            service_id: principal.service_id.clone(),
            email: principal.email.clone(),
            permissions: principal.permissions_from_token.clone(),
            user_permissions: principal.user_permissions.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct RotatedSecretResponse {
    pub service_id: String,
    pub client_secret: String,
}

#[derive(Debug, Serialize)]
pub struct ServicePrincipalView {
    pub principal_id: String,
    pub service_id: String,
    pub permissions: Vec<Permission>,
    pub enabled: bool,
}

impl From<warden_auth::ServicePrincipal> for ServicePrincipalView {
    fn from(principal: warden_auth::ServicePrincipal) -> Self {
        Self {
            principal_id: principal.id.to_string(),
            service_id: principal.service_id,
            permissions: principal.permissions,
            enabled: principal.enabled,
        }
    }
}
