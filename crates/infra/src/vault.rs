//! Vault key backend (KV v2 over HTTP).
//!
//! Key pairs live at `{mount}/data/jwt/keys/{kid}` with the PEM halves in the
//! `private` and `public` fields of the secret.

use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use reqwest::StatusCode;
use serde::Deserialize;

use warden_auth::keys::CachePolicy;
use warden_auth::{BackendError, KeyBackend, KeyRecord};

const MAX_KEY_ID_LEN: usize = 128;
const MAX_REMEMBERED_MISSES: u64 = 10_000;

#[derive(Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Base address, e.g. `https://vault.internal:8200`.
    pub addr: String,
    pub token: String,
    pub mount: String,
    /// Upper bound on one HTTP round-trip.
    pub timeout: Duration,
    /// How long fetched material is served before the vault is asked again.
    pub cache_ttl: Duration,
    /// How long a 404 for a key id is remembered before the vault is asked again.
    pub not_found_ttl: Duration,
}

impl VaultConfig {
    pub fn new(addr: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            token: token.into(),
            mount: "secret".to_string(),
            timeout: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(300),
            not_found_ttl: Duration::from_secs(30),
        }
    }
}

impl core::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("addr", &self.addr)
            .field("mount", &self.mount)
            .field("timeout", &self.timeout)
            .field("cache_ttl", &self.cache_ttl)
            .field("not_found_ttl", &self.not_found_ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct KvResponse {
    data: KvEnvelope,
}

#[derive(Deserialize)]
struct KvEnvelope {
    data: KeyFields,
}

#[derive(Deserialize)]
struct KeyFields {
    #[serde(default)]
    private: Option<String>,
    #[serde(default)]
    public: Option<String>,
}

#[derive(Clone)]
pub struct VaultKeyBackend {
    client: reqwest::Client,
    config: VaultConfig,
    /// Key ids the vault recently answered 404 for.
    misses: Cache<String, ()>,
}

impl core::fmt::Debug for VaultKeyBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VaultKeyBackend")
            .field("config", &self.config)
            .field("remembered_misses", &self.misses.entry_count())
            .finish_non_exhaustive()
    }
}

impl VaultKeyBackend {
    pub fn new(config: VaultConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Unreachable(format!("building http client: {e}")))?;
        let misses = Cache::builder()
            .max_capacity(MAX_REMEMBERED_MISSES)
            .time_to_live(config.not_found_ttl)
            .build();
        Ok(Self {
            client,
            config,
            misses,
        })
    }

    fn key_url(&self, key_id: &str) -> String {
        format!(
            "{}/v1/{}/data/jwt/keys/{}",
            self.config.addr.trim_end_matches('/'),
            self.config.mount.trim_matches('/'),
            key_id
        )
    }

    fn transport_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.config.timeout)
        } else {
            BackendError::Unreachable(err.to_string())
        }
    }
}

/// Key ids arrive from untrusted token headers and are spliced into a path.
fn is_addressable_key_id(key_id: &str) -> bool {
    !key_id.is_empty()
        && key_id.len() <= MAX_KEY_ID_LEN
        && key_id != "."
        && key_id != ".."
        && key_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn parse_record(key_id: &str, body: &[u8]) -> Result<KeyRecord, BackendError> {
    let response: KvResponse = serde_json::from_slice(body)
        .map_err(|e| BackendError::Malformed(format!("unexpected response body: {e}")))?;
    let fields = response.data.data;

    let public_pem = fields
        .public
        .filter(|pem| !pem.trim().is_empty())
        .ok_or_else(|| BackendError::Malformed(format!("secret for '{key_id}' has no public key")))?;

    Ok(KeyRecord {
        key_id: key_id.to_string(),
        private_pem: fields.private.filter(|pem| !pem.trim().is_empty()),
        public_pem,
    })
}

#[async_trait]
impl KeyBackend for VaultKeyBackend {
    fn name(&self) -> &'static str {
        "vault"
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::Ttl(self.config.cache_ttl)
    }

    async fn fetch(&self, key_id: &str) -> Result<Option<KeyRecord>, BackendError> {
        if !is_addressable_key_id(key_id) {
            tracing::debug!(key_id, "key id cannot name a vault secret");
            return Ok(None);
        }
        if self.misses.contains_key(key_id) {
            tracing::debug!(key_id, "key id recently missing from vault");
            return Ok(None);
        }

        let response = self
            .client
            .get(self.key_url(key_id))
            .header("X-Vault-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                self.misses.insert(key_id.to_string(), ());
                Ok(None)
            }
            status if status.is_success() => {
                let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
                parse_record(key_id, &body).map(Some)
            }
            status => Err(BackendError::Rejected(format!("vault answered {status}"))),
        }
    }
}
