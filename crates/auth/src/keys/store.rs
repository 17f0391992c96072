//! Key cache with ordered backend fallback and single-flight refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Deserialize;
use tokio::sync::Mutex;

use warden_core::Clock;

use super::{CachePolicy, KeyBackend, KeyMaterial};
use crate::error::KeyStoreError;

/// Upper bound on distinct key ids held at once.
const MAX_CACHED_KEY_IDS: u64 = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Key id used for signing and for tokens whose header carries no `kid`.
    pub default_key_id: String,

    /// Upper bound on a single backend fetch.
    #[serde(with = "crate::config::duration_secs")]
    pub fetch_timeout: Duration,

    /// While serving last-known-good material after a failed refresh, how
    /// long to wait before probing the backends again.
    #[serde(with = "crate::config::duration_secs")]
    pub stale_retry_interval: Duration,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            default_key_id: "default".to_string(),
            fetch_timeout: Duration::from_secs(2),
            stale_retry_interval: Duration::from_secs(30),
        }
    }
}

struct CachedKey {
    material: Arc<KeyMaterial>,
    /// `None` = valid for the process lifetime.
    refresh_after: Option<DateTime<Utc>>,
}

impl CachedKey {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.refresh_after.is_none_or(|deadline| now < deadline)
    }
}

#[derive(Default)]
struct SlotState {
    cached: Option<CachedKey>,
    last_failure: Option<KeyStoreError>,
}

/// Per-key cache slot. Holding `state` is what makes a refresh single-flight.
#[derive(Default)]
struct KeySlot {
    state: Mutex<SlotState>,
    /// Bumped after every completed backend round-trip.
    completed: AtomicU64,
}

enum Resolution {
    Found(Arc<KeyMaterial>, CachePolicy),
    NotFound,
    Failed(String),
}

/// Resolves and caches RSA key material by `kid`.
///
/// Shared by the issuer and the validator; pass it around as `Arc<KeyStore>`.
///
/// The slot map is a bounded moka cache without time-based expiry: freshness
/// lives in each slot and is judged against the injected [`Clock`].
pub struct KeyStore {
    backends: Vec<Arc<dyn KeyBackend>>,
    config: KeyStoreConfig,
    clock: Arc<dyn Clock>,
    slots: Cache<String, Arc<KeySlot>>,
}

impl KeyStore {
    /// Backends are consulted in the given order (vault first, then file/inline).
    pub fn new(
        backends: Vec<Arc<dyn KeyBackend>>,
        config: KeyStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backends,
            config,
            clock,
            slots: Cache::builder().max_capacity(MAX_CACHED_KEY_IDS).build(),
        }
    }

    pub fn default_key_id(&self) -> &str {
        &self.config.default_key_id
    }

    /// Key used for signing. Requires the private half.
    pub async fn get_signing_key(
        &self,
        key_id: Option<&str>,
    ) -> Result<Arc<KeyMaterial>, KeyStoreError> {
        let key_id = key_id.unwrap_or(&self.config.default_key_id);
        let material = self.resolve(key_id).await?;
        if !material.can_sign() {
            return Err(KeyStoreError::MissingPrivateKey(key_id.to_string()));
        }
        Ok(material)
    }

    /// Key used to verify a token whose header names `key_id`.
    pub async fn get_verification_key(
        &self,
        key_id: &str,
    ) -> Result<Arc<KeyMaterial>, KeyStoreError> {
        self.resolve(key_id).await
    }

    /// Resolve the default signing key once, so a misconfigured deployment
    /// fails at startup instead of on its first request.
    pub async fn warm_up(&self) -> Result<Arc<KeyMaterial>, KeyStoreError> {
        self.get_signing_key(None).await
    }

    /// Drop one cached key; the next lookup goes back to the backends.
    pub fn invalidate(&self, key_id: &str) {
        if self.slots.remove(key_id).is_some() {
            tracing::info!(key_id, "invalidated cached key material");
        }
    }

    pub fn clear(&self) {
        let count = self.slots.entry_count();
        self.slots.invalidate_all();
        tracing::warn!(cached_keys = count, "cleared all cached key material");
    }

    /// Concurrent callers for a new id receive the same slot.
    fn slot(&self, key_id: &str) -> Arc<KeySlot> {
        self.slots
            .get_with_by_ref(key_id, || Arc::new(KeySlot::default()))
    }

    fn forget_slot(&self, key_id: &str, slot: &Arc<KeySlot>) {
        if self
            .slots
            .get(key_id)
            .is_some_and(|current| Arc::ptr_eq(&current, slot))
        {
            self.slots.invalidate(key_id);
        }
    }

    async fn resolve(&self, key_id: &str) -> Result<Arc<KeyMaterial>, KeyStoreError> {
        let slot = self.slot(key_id);
        let seen = slot.completed.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        let now = self.clock.now();
        if let Some(cached) = state.cached.as_ref().filter(|c| c.is_fresh(now)) {
            return Ok(cached.material.clone());
        }

        // Another caller finished a round-trip while we were queued: share its
        // outcome instead of hitting the backends again.
        if slot.completed.load(Ordering::Acquire) != seen {
            if let Some(err) = &state.last_failure {
                return Err(err.clone());
            }
        }

        let stale = state.cached.as_ref().map(|c| c.material.clone());
        let resolution = self.fetch_from_backends(key_id, stale.is_some()).await;
        slot.completed.fetch_add(1, Ordering::AcqRel);

        match resolution {
            Resolution::Found(material, policy) => {
                tracing::debug!(key_id, backend = material.source(), "cached key material");
                state.cached = Some(CachedKey {
                    refresh_after: policy.refresh_after(material.fetched_at()),
                    material: material.clone(),
                });
                state.last_failure = None;
                Ok(material)
            }
            Resolution::Failed(reason) => match stale {
                Some(material) => {
                    let retry = chrono::Duration::from_std(self.config.stale_retry_interval)
                        .unwrap_or(chrono::Duration::seconds(30));
                    tracing::warn!(
                        key_id,
                        reason = %reason,
                        fetched_at = %material.fetched_at(),
                        "key refresh failed, serving last-known-good material"
                    );
                    state.cached = Some(CachedKey {
                        material: material.clone(),
                        refresh_after: Some(now + retry),
                    });
                    Ok(material)
                }
                None => {
                    tracing::error!(key_id, reason = %reason, "no key material available");
                    let err = KeyStoreError::unavailable(key_id, reason);
                    state.last_failure = Some(err.clone());
                    drop(state);
                    // Queued callers hold the slot and still share this failure.
                    self.forget_slot(key_id, &slot);
                    Err(err)
                }
            },
            Resolution::NotFound => {
                tracing::warn!(key_id, "key id not found in any backend");
                let err = KeyStoreError::unavailable(key_id, "not found in any backend");
                state.cached = None;
                state.last_failure = Some(err.clone());
                drop(state);
                self.forget_slot(key_id, &slot);
                Err(err)
            }
        }
    }

    async fn fetch_from_backends(&self, key_id: &str, has_stale: bool) -> Resolution {
        let mut failures: Vec<String> = Vec::new();

        for backend in &self.backends {
            let name = backend.name();
            let outcome = tokio::time::timeout(self.config.fetch_timeout, backend.fetch(key_id)).await;

            let failure = match outcome {
                Ok(Ok(Some(record))) => {
                    match KeyMaterial::from_record(&record, self.clock.now(), name) {
                        Ok(material) => {
                            return Resolution::Found(Arc::new(material), backend.cache_policy());
                        }
                        Err(e) => format!("{name}: {e}"),
                    }
                }
                Ok(Ok(None)) => {
                    tracing::debug!(key_id, backend = name, "key not held by backend");
                    continue;
                }
                Ok(Err(e)) => format!("{name}: {e}"),
                Err(_) => format!("{name}: timed out after {:?}", self.config.fetch_timeout),
            };

            tracing::warn!(key_id, backend = name, reason = %failure, "key backend failed");
            if has_stale {
                return Resolution::Failed(failure);
            }
            failures.push(failure);
        }

        if failures.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::Failed(failures.join("; "))
        }
    }
}
