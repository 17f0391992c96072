//! Single entry point for request interceptors: decode, then check.

use std::sync::Arc;

use crate::Permission;
use crate::authorize::PermissionChecker;
use crate::error::{AuthFailure, TokenError};
use crate::principal::{PrincipalDecoder, RequestPrincipal};

/// Orchestrates `PrincipalDecoder::decode` → `PermissionChecker::require`.
///
/// Only the token-based check is wired in here. Resource-level decisions go
/// through [`crate::engine::AuthorizationEngine`] explicitly at the call site.
#[derive(Clone)]
pub struct AuthorizationManager {
    decoder: Arc<PrincipalDecoder>,
    checker: PermissionChecker,
}

impl AuthorizationManager {
    pub fn new(decoder: Arc<PrincipalDecoder>) -> Self {
        Self {
            decoder,
            checker: PermissionChecker,
        }
    }

    pub fn checker(&self) -> &PermissionChecker {
        &self.checker
    }

    /// Decode the presented token without requiring any permission.
    pub async fn authenticate(&self, raw: Option<&str>) -> Result<RequestPrincipal, AuthFailure> {
        let decoded = match raw {
            Some(raw) => self.decoder.decode(raw).await,
            None => Err(TokenError::MissingToken),
        };
        decoded.map_err(|e| {
            match &e {
                TokenError::KeyUnavailable(cause) => {
                    tracing::error!(kind = e.kind(), error = %cause, "authentication failed");
                }
                _ => tracing::info!(kind = e.kind(), "authentication failed"),
            }
            AuthFailure::from(e)
        })
    }

    pub async fn authorize(
        &self,
        raw: Option<&str>,
        required: &Permission,
    ) -> Result<RequestPrincipal, AuthFailure> {
        let principal = self.authenticate(raw).await?;
        if let Err(denied) = self.checker.require(&principal, required) {
            tracing::info!(
                principal_type = ?principal.principal_type,
                permission = %required,
                "authorization denied"
            );
            return Err(denied);
        }
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use warden_core::{Clock, ManualClock};

    use super::*;
    use crate::config::AuthConfig;
    use crate::issuer::TokenIssuer;
    use crate::testing;
    use crate::validator::TokenValidator;

    fn setup() -> (Arc<ManualClock>, TokenIssuer, AuthorizationManager) {
        let clock = Arc::new(ManualClock::starting_now());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = testing::inline_key_store("main", dyn_clock.clone());
        let issuer = TokenIssuer::new(store.clone(), AuthConfig::default(), dyn_clock.clone());
        let validator = Arc::new(TokenValidator::new(store, AuthConfig::default(), dyn_clock));
        let manager = AuthorizationManager::new(Arc::new(PrincipalDecoder::new(validator)));
        (clock, issuer, manager)
    }

    #[tokio::test]
    async fn grants_and_denies_by_token_permissions() {
        let (_, issuer, manager) = setup();
        let token = issuer
            .issue_access_token("user-1", "u@example.com", &[Permission::new("a:b:view")])
            .await
            .unwrap();

        let principal = manager
            .authorize(Some(&token), &Permission::new("a:b:view"))
            .await
            .unwrap();
        assert_eq!(principal.subject(), "user-1");

        let err = manager
            .authorize(Some(&token), &Permission::new("a:b:edit"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.public_message(), "Permission denied: a:b:edit");
    }

    #[tokio::test]
    async fn every_token_failure_is_401() {
        let (clock, issuer, manager) = setup();
        let p = Permission::new("a:b:view");

        let missing = manager.authorize(None, &p).await.unwrap_err();
        assert_eq!(missing.status_code(), 401);

        let refresh = issuer.issue_refresh_token("user-1").await.unwrap();
        let wrong_type = manager.authorize(Some(&refresh), &p).await.unwrap_err();
        assert_eq!(wrong_type.status_code(), 401);

        let access = issuer.issue_access_token("user-1", "", &[p.clone()]).await.unwrap();
        clock.advance(chrono::Duration::hours(1));
        let expired = manager.authorize(Some(&access), &p).await.unwrap_err();
        assert_eq!(
            expired,
            AuthFailure::AuthenticationRequired(TokenError::TokenExpired)
        );
        assert_eq!(expired.public_message(), "Authentication required");
    }
}
