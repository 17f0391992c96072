use serde::{Deserialize, Serialize};

use crate::Permission;
use crate::error::TokenError;

/// Discriminant carried in the `type` claim.
///
/// It is authoritative for which decode path applies: a refresh token is never
/// accepted where an access token is required, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Service,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::Service => "service",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "access" => Some(TokenType::Access),
            "refresh" => Some(TokenType::Refresh),
            "service" => Some(TokenType::Service),
            _ => None,
        }
    }
}

impl core::fmt::Display for TokenType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full JWT payload: registered claims shared by every token plus the
/// type-specific body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: a user id for access/refresh tokens, a service id for service tokens.
    #[serde(default)]
    pub sub: String,

    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,

    /// Expiration, seconds since the Unix epoch.
    pub exp: i64,

    /// Fixed issuer identifier of the deployment.
    pub iss: String,

    #[serde(flatten)]
    pub body: ClaimBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClaimBody {
    Access(AccessClaims),
    Refresh(RefreshClaims),
    Service(ServiceClaims),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Refresh tokens are deliberately minimal: no permissions travel with them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceClaims {
    /// Target service.
    pub aud: String,

    #[serde(default)]
    pub permissions: Vec<Permission>,

    /// Propagated end-user context for delegated calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_permissions: Option<Vec<Permission>>,
}

impl ClaimBody {
    pub fn token_type(&self) -> TokenType {
        match self {
            ClaimBody::Access(_) => TokenType::Access,
            ClaimBody::Refresh(_) => TokenType::Refresh,
            ClaimBody::Service(_) => TokenType::Service,
        }
    }
}

impl TokenClaims {
    pub fn token_type(&self) -> TokenType {
        self.body.token_type()
    }

    /// Permissions embedded in the token (always empty for refresh tokens).
    pub fn permissions(&self) -> &[Permission] {
        match &self.body {
            ClaimBody::Access(c) => &c.permissions,
            ClaimBody::Service(c) => &c.permissions,
            ClaimBody::Refresh(_) => &[],
        }
    }

    /// Seconds remaining until expiry at `now` (zero once expired).
    pub fn expires_in(&self, now: i64) -> u64 {
        u64::try_from(self.exp - now).unwrap_or(0)
    }
}

/// Deterministically check the token's time window.
///
/// Zero grace period: a token is expired from the second named by `exp` on.
pub fn validate_time_window(iat: i64, exp: i64, now: i64) -> Result<(), TokenError> {
    if exp <= iat {
        return Err(TokenError::malformed_claims(
            "invalid time window (exp <= iat)",
        ));
    }
    if now >= exp {
        return Err(TokenError::TokenExpired);
    }
    Ok(())
}
