//! Service principals and the OAuth2 client-credentials grant.
//!
//! Client secrets are generated here, returned exactly once and persisted only
//! as Argon2id PHC strings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use tokio::sync::OnceCell;

use warden_core::{Clock, ServicePrincipalId};

use crate::Permission;
use crate::error::{CredentialError, RepositoryError};
use crate::issuer::{TokenIssuer, UserContext};

const SECRET_BYTES: usize = 32;
const SALT_BYTES: usize = 16;
const MAX_SERVICE_ID_LEN: usize = 128;

/// Persisted service identity. Never deleted; disabled instead.
#[derive(Clone, PartialEq, Eq)]
pub struct ServicePrincipal {
    pub id: ServicePrincipalId,
    pub service_id: String,
    pub client_secret_hash: String,
    pub permissions: Vec<Permission>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl core::fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("id", &self.id)
            .field("service_id", &self.service_id)
            .field("permissions", &self.permissions)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Result of a registration; the only time the plaintext secret exists.
#[derive(Clone, Serialize)]
pub struct ServiceRegistration {
    pub principal_id: ServicePrincipalId,
    pub service_id: String,
    pub client_secret: String,
}

impl core::fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("principal_id", &self.principal_id)
            .field("service_id", &self.service_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// OAuth2 token response body.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ServiceTokenGrant {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

impl core::fmt::Debug for ServiceTokenGrant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceTokenGrant")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ServicePrincipalRepository: Send + Sync {
    async fn find(&self, service_id: &str) -> Result<Option<ServicePrincipal>, RepositoryError>;

    /// Fails with `Conflict` when `service_id` is taken.
    async fn insert(&self, principal: &ServicePrincipal) -> Result<(), RepositoryError>;

    async fn update(&self, principal: &ServicePrincipal) -> Result<(), RepositoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryServicePrincipalRepository {
    principals: RwLock<HashMap<String, ServicePrincipal>>,
}

impl InMemoryServicePrincipalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServicePrincipalRepository for InMemoryServicePrincipalRepository {
    async fn find(&self, service_id: &str) -> Result<Option<ServicePrincipal>, RepositoryError> {
        let map = self.principals.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(service_id).cloned())
    }

    async fn insert(&self, principal: &ServicePrincipal) -> Result<(), RepositoryError> {
        let mut map = self.principals.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(&principal.service_id) {
            return Err(RepositoryError::Conflict(principal.service_id.clone()));
        }
        map.insert(principal.service_id.clone(), principal.clone());
        Ok(())
    }

    async fn update(&self, principal: &ServicePrincipal) -> Result<(), RepositoryError> {
        let mut map = self.principals.write().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(&principal.service_id) {
            Some(existing) => {
                *existing = principal.clone();
                Ok(())
            }
            None => Err(RepositoryError::Query(format!(
                "no service principal '{}'",
                principal.service_id
            ))),
        }
    }
}

/// Argon2id hashing of client secrets.
///
/// Clones share one verification counter.
#[derive(Debug, Clone)]
pub struct SecretHasher {
    params: Params,
    verifications: Arc<AtomicU64>,
}

impl SecretHasher {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            verifications: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of secret verifications performed so far.
    pub fn verifications(&self) -> u64 {
        self.verifications.load(Ordering::Relaxed)
    }

    /// Minimal-cost parameters; only for tests.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fast() -> Self {
        Self::new(Params::new(Params::MIN_M_COST, 1, 1, None).unwrap_or_default())
    }

    pub fn hash(&self, secret: &str) -> Result<String, CredentialError> {
        let mut salt = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt =
            SaltString::encode_b64(&salt).map_err(|e| CredentialError::Hashing(e.to_string()))?;

        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError::Hashing(e.to_string()))
    }

    /// Parameters are taken from the stored PHC string.
    pub fn verify(&self, secret: &str, stored: &str) -> bool {
        self.verifications.fetch_add(1, Ordering::Relaxed);
        match PasswordHash::new(stored) {
            Ok(parsed) => Argon2::default()
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    async fn hash_blocking(&self, secret: String) -> Result<String, CredentialError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| CredentialError::Hashing(e.to_string()))?
    }

    async fn verify_blocking(&self, secret: String, stored: String) -> bool {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&secret, &stored))
            .await
            .unwrap_or(false)
    }
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self::new(Params::default())
    }
}

pub struct ServiceCredentialStore {
    repository: Arc<dyn ServicePrincipalRepository>,
    issuer: Arc<TokenIssuer>,
    hasher: SecretHasher,
    clock: Arc<dyn Clock>,
    /// Verified against when the client id is unknown, so that path costs
    /// the same Argon2 work as a wrong secret.
    decoy_hash: OnceCell<String>,
}

impl ServiceCredentialStore {
    pub fn new(
        repository: Arc<dyn ServicePrincipalRepository>,
        issuer: Arc<TokenIssuer>,
        hasher: SecretHasher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            issuer,
            hasher,
            clock,
            decoy_hash: OnceCell::new(),
        }
    }

    /// Register `service_id`. An existing registration is only replaced when
    /// `force` is set; its principal id survives, its secret does not.
    pub async fn register(
        &self,
        service_id: &str,
        permissions: Vec<Permission>,
        force: bool,
    ) -> Result<ServiceRegistration, CredentialError> {
        validate_service_id(service_id)?;
        let existing = self.repository.find(service_id).await?;
        if existing.is_some() && !force {
            return Err(CredentialError::AlreadyRegistered(service_id.to_string()));
        }

        let client_secret = generate_secret();
        let client_secret_hash = self.hasher.hash_blocking(client_secret.clone()).await?;
        let now = self.clock.now();

        let principal = match existing {
            Some(previous) => {
                let replaced = ServicePrincipal {
                    client_secret_hash,
                    permissions,
                    enabled: true,
                    updated_at: now,
                    ..previous
                };
                self.repository.update(&replaced).await?;
                tracing::warn!(service_id, "service principal re-registered");
                replaced
            }
            None => {
                let principal = ServicePrincipal {
                    id: ServicePrincipalId::new(),
                    service_id: service_id.to_string(),
                    client_secret_hash,
                    permissions,
                    enabled: true,
                    created_at: now,
                    updated_at: now,
                };
                self.repository
                    .insert(&principal)
                    .await
                    .map_err(|e| match e {
                        RepositoryError::Conflict(_) => {
                            CredentialError::AlreadyRegistered(service_id.to_string())
                        }
                        other => CredentialError::Repository(other),
                    })?;
                tracing::info!(service_id, "service principal registered");
                principal
            }
        };

        Ok(ServiceRegistration {
            principal_id: principal.id,
            service_id: principal.service_id,
            client_secret,
        })
    }

    /// Unknown client, wrong secret and disabled principal are indistinguishable,
    /// in outcome and in hashing work.
    pub async fn authenticate(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<ServicePrincipal, CredentialError> {
        let Some(principal) = self.repository.find(client_id).await? else {
            let decoy = self.decoy_hash().await?.to_string();
            self.hasher
                .verify_blocking(client_secret.to_string(), decoy)
                .await;
            tracing::info!(reason = "unknown_client", "client authentication failed");
            return Err(CredentialError::InvalidCredentials);
        };
        let verified = self
            .hasher
            .verify_blocking(
                client_secret.to_string(),
                principal.client_secret_hash.clone(),
            )
            .await;
        if !verified {
            tracing::info!(reason = "secret_mismatch", "client authentication failed");
            return Err(CredentialError::InvalidCredentials);
        }
        if !principal.enabled {
            tracing::info!(reason = "disabled", "client authentication failed");
            return Err(CredentialError::InvalidCredentials);
        }
        Ok(principal)
    }

    /// Client-credentials grant: authenticate, then issue a service token
    /// carrying the principal's stored permissions.
    pub async fn issue_token(
        &self,
        client_id: &str,
        client_secret: &str,
        audience: &str,
    ) -> Result<ServiceTokenGrant, CredentialError> {
        self.issue_token_for_user(client_id, client_secret, audience, None)
            .await
    }

    /// As [`Self::issue_token`], propagating an end-user context.
    pub async fn issue_token_for_user(
        &self,
        client_id: &str,
        client_secret: &str,
        audience: &str,
        user_context: Option<UserContext>,
    ) -> Result<ServiceTokenGrant, CredentialError> {
        let principal = self.authenticate(client_id, client_secret).await?;
        let lifetime = self.issuer.config().service_token_ttl;
        let access_token = self
            .issuer
            .issue_service_token(
                &principal.service_id,
                audience,
                &principal.permissions,
                lifetime,
                user_context,
            )
            .await?;
        Ok(ServiceTokenGrant {
            access_token,
            token_type: "Bearer",
            expires_in: lifetime.as_secs(),
        })
    }

    /// Replace the secret; the previous one stops working immediately.
    pub async fn rotate_secret(&self, service_id: &str) -> Result<String, CredentialError> {
        let mut principal = self.existing(service_id).await?;
        let client_secret = generate_secret();
        principal.client_secret_hash = self.hasher.hash_blocking(client_secret.clone()).await?;
        principal.updated_at = self.clock.now();
        self.repository.update(&principal).await?;
        tracing::info!(service_id, "client secret rotated");
        Ok(client_secret)
    }

    /// Takes effect for tokens issued afterwards.
    pub async fn update_permissions(
        &self,
        service_id: &str,
        permissions: Vec<Permission>,
    ) -> Result<ServicePrincipal, CredentialError> {
        let mut principal = self.existing(service_id).await?;
        principal.permissions = permissions;
        principal.updated_at = self.clock.now();
        self.repository.update(&principal).await?;
        tracing::info!(service_id, "service permissions updated");
        Ok(principal)
    }

    pub async fn disable(&self, service_id: &str) -> Result<(), CredentialError> {
        let mut principal = self.existing(service_id).await?;
        if principal.enabled {
            principal.enabled = false;
            principal.updated_at = self.clock.now();
            self.repository.update(&principal).await?;
            tracing::info!(service_id, "service principal disabled");
        }
        Ok(())
    }

    async fn decoy_hash(&self) -> Result<&str, CredentialError> {
        self.decoy_hash
            .get_or_try_init(|| self.hasher.hash_blocking(generate_secret()))
            .await
            .map(String::as_str)
    }

    async fn existing(&self, service_id: &str) -> Result<ServicePrincipal, CredentialError> {
        self.repository
            .find(service_id)
            .await?
            .ok_or_else(|| CredentialError::NotFound(service_id.to_string()))
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn validate_service_id(service_id: &str) -> Result<(), CredentialError> {
    let invalid = |reason: &str| Err(CredentialError::InvalidServiceId(reason.to_string()));
    if service_id.is_empty() {
        return invalid("empty");
    }
    if service_id.len() > MAX_SERVICE_ID_LEN {
        return invalid("too long");
    }
    if !service_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return invalid("only ASCII letters, digits, '-', '_' and '.' are allowed");
    }
    Ok(())
}
