//! RSA key material and the backends it is resolved from.
//!
//! ```text
//! KeyStore::get_*_key(kid)
//!     → fresh cache entry?            → return
//!     → single in-flight fetch per kid
//!         → vault backend (TTL 5m)    → miss / error: next backend or last-known-good
//!         → file/inline backend       → cached for process lifetime
//!     → nothing usable                → KeyUnavailable
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};

use crate::error::{BackendError, KeyStoreError};

pub mod inline;
pub mod store;

pub use inline::InlineKeyBackend;
pub use store::{KeyStore, KeyStoreConfig};

/// Raw PEM record as stored by a backend.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub key_id: String,
    pub private_pem: Option<String>,
    pub public_pem: String,
}

impl core::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key_id", &self.key_id)
            .field("private_pem", &self.private_pem.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// How long material from a backend may be served before it is re-fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Ttl(Duration),
    /// Cannot rotate without a restart.
    ProcessLifetime,
}

impl CachePolicy {
    pub(crate) fn refresh_after(&self, fetched_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CachePolicy::Ttl(ttl) => {
                let ttl = chrono::Duration::from_std(*ttl).unwrap_or(chrono::Duration::MAX);
                Some(fetched_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC))
            }
            CachePolicy::ProcessLifetime => None,
        }
    }
}

/// A source of key material.
///
/// `Ok(None)` means the backend answered and does not hold the key; `Err` means
/// it could not answer at all.
#[async_trait]
pub trait KeyBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn cache_policy(&self) -> CachePolicy;

    async fn fetch(&self, key_id: &str) -> Result<Option<KeyRecord>, BackendError>;
}

/// Parsed, immutable RSA key pair (or public half only).
///
/// A given `key_id` never changes content during its lifetime; rotation
/// introduces a new id.
pub struct KeyMaterial {
    key_id: String,
    private_key: Option<EncodingKey>,
    public_key: DecodingKey,
    fetched_at: DateTime<Utc>,
    source: &'static str,
}

impl KeyMaterial {
    pub fn from_record(
        record: &KeyRecord,
        fetched_at: DateTime<Utc>,
        source: &'static str,
    ) -> Result<Self, KeyStoreError> {
        let invalid = |reason: String| KeyStoreError::InvalidKeyMaterial {
            key_id: record.key_id.clone(),
            reason,
        };

        let public_key = DecodingKey::from_rsa_pem(record.public_pem.as_bytes())
            .map_err(|e| invalid(format!("public key: {e}")))?;

        let private_key = match record.private_pem.as_deref() {
            Some(pem) if !pem.trim().is_empty() => Some(
                EncodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| invalid(format!("private key: {e}")))?,
            ),
            _ => None,
        };

        Ok(Self {
            key_id: record.key_id.clone(),
            private_key,
            public_key,
            fetched_at,
            source,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn can_sign(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn encoding_key(&self) -> Result<&EncodingKey, KeyStoreError> {
        self.private_key
            .as_ref()
            .ok_or_else(|| KeyStoreError::MissingPrivateKey(self.key_id.clone()))
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.public_key
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Name of the backend that produced this material.
    pub fn source(&self) -> &'static str {
        self.source
    }
}

impl core::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .field("can_sign", &self.can_sign())
            .field("fetched_at", &self.fetched_at)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn parses_pkcs1_pair() {
        let record = testing::primary_record("k1");
        let material = KeyMaterial::from_record(&record, Utc::now(), "test").unwrap();
        assert_eq!(material.key_id(), "k1");
        assert!(material.can_sign());
    }

    #[test]
    fn public_only_material_cannot_sign() {
        let mut record = testing::primary_record("k1");
        record.private_pem = None;
        let material = KeyMaterial::from_record(&record, Utc::now(), "test").unwrap();
        assert!(matches!(
            material.encoding_key(),
            Err(KeyStoreError::MissingPrivateKey(id)) if id == "k1"
        ));
    }

    #[test]
    fn garbage_pem_is_rejected() {
        let record = KeyRecord {
            key_id: "bad".to_string(),
            private_pem: None,
            public_pem: "not a pem".to_string(),
        };
        assert!(matches!(
            KeyMaterial::from_record(&record, Utc::now(), "test"),
            Err(KeyStoreError::InvalidKeyMaterial { .. })
        ));
    }

    #[test]
    fn debug_output_redacts_private_pem() {
        let record = testing::primary_record("k1");
        let rendered = format!("{record:?}");
        assert!(!rendered.contains("BEGIN RSA PRIVATE KEY"));
    }

    #[test]
    fn ttl_policy_sets_refresh_deadline() {
        let now = Utc::now();
        let ttl = CachePolicy::Ttl(Duration::from_secs(300));
        assert_eq!(ttl.refresh_after(now), Some(now + chrono::Duration::seconds(300)));
        assert_eq!(CachePolicy::ProcessLifetime.refresh_after(now), None);
    }
}
