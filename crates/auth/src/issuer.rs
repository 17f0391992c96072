//! Token issuance (sign-in, refresh, client-credentials).
//!
//! Only RS256 is ever produced. The signing key's id is written to the `kid`
//! header so validators select the matching public key without guessing.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Header};

use warden_core::Clock;

use crate::claims::{AccessClaims, ClaimBody, RefreshClaims, ServiceClaims, TokenClaims};
use crate::config::AuthConfig;
use crate::error::IssueError;
use crate::keys::KeyStore;
use crate::Permission;

/// End-user context propagated inside a service token for delegated calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
    pub permissions: Vec<Permission>,
}

pub struct TokenIssuer {
    key_store: Arc<KeyStore>,
    config: AuthConfig,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(key_store: Arc<KeyStore>, config: AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            key_store,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub async fn issue_access_token(
        &self,
        user_id: &str,
        email: &str,
        permissions: &[Permission],
    ) -> Result<String, IssueError> {
        let body = ClaimBody::Access(AccessClaims {
            email: email.to_string(),
            permissions: permissions.to_vec(),
        });
        self.sign(user_id, body, self.config.access_token_ttl).await
    }

    pub async fn issue_refresh_token(&self, user_id: &str) -> Result<String, IssueError> {
        let body = ClaimBody::Refresh(RefreshClaims {});
        self.sign(user_id, body, self.config.refresh_token_ttl).await
    }

    /// Issue a service-to-service token.
    ///
    /// `lifetime` is the caller's choice but must be positive and within
    /// `service_token_max_ttl`; anything else is a programming error and is
    /// rejected, never clamped.
    pub async fn issue_service_token(
        &self,
        service_id: &str,
        audience: &str,
        permissions: &[Permission],
        lifetime: Duration,
        user_context: Option<UserContext>,
    ) -> Result<String, IssueError> {
        let ceiling = self.config.service_token_max_ttl;
        if lifetime > ceiling {
            return Err(IssueError::LifetimeExceedsCeiling {
                requested: lifetime.as_secs(),
                ceiling: ceiling.as_secs(),
            });
        }
        if audience.trim().is_empty() {
            return Err(IssueError::MissingAudience);
        }

        let (user_id, user_permissions) = match user_context {
            Some(ctx) => (Some(ctx.user_id), Some(ctx.permissions)),
            None => (None, None),
        };
        let body = ClaimBody::Service(ServiceClaims {
            aud: audience.to_string(),
            permissions: permissions.to_vec(),
            user_id,
            user_permissions,
        });
        self.sign(service_id, body, lifetime).await
    }

    async fn sign(
        &self,
        subject: &str,
        body: ClaimBody,
        lifetime: Duration,
    ) -> Result<String, IssueError> {
        if subject.trim().is_empty() {
            return Err(IssueError::MissingSubject);
        }
        let lifetime = i64::try_from(lifetime.as_secs()).map_err(|_| IssueError::InvalidLifetime)?;
        if lifetime <= 0 {
            return Err(IssueError::InvalidLifetime);
        }

        let iat = self.clock.now_epoch_seconds();
        let token_type = body.token_type();
        let claims = TokenClaims {
            sub: subject.to_string(),
            iat,
            exp: iat + lifetime,
            iss: self.config.issuer.clone(),
            body,
        };

        let key = self.key_store.get_signing_key(None).await?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.key_id().to_string());

        let token = jsonwebtoken::encode(&header, &claims, key.encoding_key()?)
            .map_err(|e| IssueError::Signing(e.to_string()))?;

        tracing::debug!(
            token_type = token_type.as_str(),
            key_id = key.key_id(),
            exp = claims.exp,
            "issued token"
        );
        Ok(token)
    }
}
