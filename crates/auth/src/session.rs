//! Sign-in and refresh-token exchange for end users.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use warden_core::UserId;

use crate::claims::TokenType;
use crate::engine::AuthorizationEngine;
use crate::error::{RepositoryError, SessionError, TokenError};
use crate::issuer::TokenIssuer;
use crate::validator::TokenValidator;

/// User account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// User is active and can authenticate.
    #[default]
    Active,
    /// User is suspended and cannot authenticate.
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub status: UserStatus,
}

impl UserRecord {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Read access to the user accounts tokens are issued for.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, RepositoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, user: UserRecord) {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, RepositoryError> {
        Ok(self
            .users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }
}

/// Access/refresh pair handed to a signed-in user.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

impl core::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Issues session token pairs with permissions resolved fresh from the RBAC graph.
pub struct SessionService {
    issuer: Arc<TokenIssuer>,
    validator: Arc<TokenValidator>,
    engine: Arc<AuthorizationEngine>,
    users: Arc<dyn UserDirectory>,
}

impl SessionService {
    pub fn new(
        issuer: Arc<TokenIssuer>,
        validator: Arc<TokenValidator>,
        engine: Arc<AuthorizationEngine>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            issuer,
            validator,
            engine,
            users,
        }
    }

    /// Called once the user's primary credentials have been verified elsewhere.
    pub async fn issue_session(&self, user: &UserRecord) -> Result<SessionTokens, SessionError> {
        if !user.is_active() {
            return Err(SessionError::UserUnavailable);
        }
        let subject = user.id.to_string();
        let permissions = self.engine.get_user_permissions(user.id).await?;

        let access_token = self
            .issuer
            .issue_access_token(&subject, &user.email, &permissions)
            .await?;
        let refresh_token = self.issuer.issue_refresh_token(&subject).await?;

        tracing::info!(user_id = %user.id, permissions = permissions.len(), "session issued");
        Ok(SessionTokens {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.issuer.config().access_token_ttl.as_secs(),
        })
    }

    /// Exchange a refresh token for a new pair. Access tokens are refused.
    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<SessionTokens, SessionError> {
        let claims = self
            .validator
            .validate(raw_refresh_token, TokenType::Refresh)
            .await?;
        let user_id: UserId = claims
            .sub
            .parse()
            .map_err(|_| TokenError::malformed_claims("subject is not a user id"))?;

        match self.users.find_user(user_id).await? {
            Some(user) if user.is_active() => self.issue_session(&user).await,
            Some(user) => {
                tracing::info!(user_id = %user_id, status = user.status.as_str(), "refresh refused");
                Err(SessionError::UserUnavailable)
            }
            None => {
                tracing::info!(user_id = %user_id, "refresh refused for unknown user");
                Err(SessionError::UserUnavailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use warden_core::{Clock, ManualClock, RoleId};

    use super::*;
    use crate::Permission;
    use crate::config::AuthConfig;
    use crate::engine::{AssignmentSubject, InMemoryRbacRepository, Role, RoleGrant};
    use crate::testing;

    struct Fixture {
        clock: Arc<ManualClock>,
        users: Arc<InMemoryUserDirectory>,
        engine: Arc<AuthorizationEngine>,
        validator: Arc<TokenValidator>,
        sessions: SessionService,
        role: Role,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let keys = testing::inline_key_store("main", dyn_clock.clone());
        let issuer = Arc::new(TokenIssuer::new(keys.clone(), AuthConfig::default(), dyn_clock.clone()));
        let validator = Arc::new(TokenValidator::new(keys, AuthConfig::default(), dyn_clock.clone()));

        let rbac = Arc::new(InMemoryRbacRepository::new());
        let role = Role {
            id: RoleId::new(),
            name: "viewer".to_string(),
            permissions: vec![Permission::new("a:b:view")],
        };
        rbac.put_role(role.clone());
        let engine = Arc::new(AuthorizationEngine::new(rbac, dyn_clock));
        let users = Arc::new(InMemoryUserDirectory::new());

        Fixture {
            clock,
            users: users.clone(),
            engine: engine.clone(),
            validator: validator.clone(),
            sessions: SessionService::new(issuer, validator, engine, users),
            role,
        }
    }

    fn active_user() -> UserRecord {
        UserRecord {
            id: UserId::new(),
            email: "u@example.com".to_string(),
            status: UserStatus::Active,
        }
    }

    #[tokio::test]
    async fn session_carries_current_role_permissions() {
        let f = fixture();
        let user = active_user();
        f.engine
            .grant_role(RoleGrant {
                subject: AssignmentSubject::User(user.id),
                role_id: f.role.id,
                scope: None,
                valid_from: None,
                valid_until: None,
            })
            .await
            .unwrap();

        let tokens = f.sessions.issue_session(&user).await.unwrap();
        assert_eq!(tokens.expires_in, 900);
        let claims = f
            .validator
            .validate(&tokens.access_token, TokenType::Access)
            .await
            .unwrap();
        assert_eq!(claims.permissions(), &[Permission::new("a:b:view")]);
        assert!(f
            .validator
            .validate(&tokens.refresh_token, TokenType::Refresh)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn refresh_exchanges_only_refresh_tokens() {
        let f = fixture();
        let user = active_user();
        f.users.upsert(user.clone());
        let tokens = f.sessions.issue_session(&user).await.unwrap();

        let err = f.sessions.refresh(&tokens.access_token).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Token(TokenError::WrongTokenType { .. })
        ));

        f.clock.advance(chrono::Duration::seconds(10));
        let renewed = f.sessions.refresh(&tokens.refresh_token).await.unwrap();
        let claims = f
            .validator
            .validate(&renewed.access_token, TokenType::Access)
            .await
            .unwrap();
        assert_eq!(claims.sub, user.id.to_string());
    }

    #[tokio::test]
    async fn suspended_or_unknown_users_cannot_refresh() {
        let f = fixture();
        let user = active_user();
        f.users.upsert(user.clone());
        let tokens = f.sessions.issue_session(&user).await.unwrap();

        f.users.upsert(UserRecord {
            status: UserStatus::Suspended,
            ..user.clone()
        });
        assert_eq!(
            f.sessions.refresh(&tokens.refresh_token).await.unwrap_err(),
            SessionError::UserUnavailable
        );

        let stranger = active_user();
        let orphan = f.sessions.issue_session(&stranger).await.unwrap();
        assert_eq!(
            f.sessions.refresh(&orphan.refresh_token).await.unwrap_err(),
            SessionError::UserUnavailable
        );
    }

    #[tokio::test]
    async fn suspended_user_gets_no_session() {
        let f = fixture();
        let user = UserRecord {
            status: UserStatus::Suspended,
            ..active_user()
        };
        assert_eq!(
            f.sessions.issue_session(&user).await.unwrap_err(),
            SessionError::UserUnavailable
        );
    }
}
