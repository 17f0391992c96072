//! File/inline key backend: a single PEM pair supplied through configuration.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;

use super::{CachePolicy, KeyBackend, KeyMaterial, KeyRecord};
use crate::error::{BackendError, KeyStoreError};

/// Serves exactly one configured key id.
///
/// Material is cached for the process lifetime; rotating it requires a restart.
#[derive(Debug, Clone)]
pub struct InlineKeyBackend {
    record: KeyRecord,
}

impl InlineKeyBackend {
    /// Build from PEM strings (e.g. environment-supplied).
    ///
    /// The PEMs are parsed up front so a broken deployment fails at startup
    /// rather than on the first request. Omit the private key for
    /// verification-only services.
    pub fn from_pem(
        key_id: impl Into<String>,
        private_pem: Option<String>,
        public_pem: impl Into<String>,
    ) -> Result<Self, KeyStoreError> {
        let record = KeyRecord {
            key_id: key_id.into(),
            private_pem,
            public_pem: public_pem.into(),
        };
        KeyMaterial::from_record(&record, Utc::now(), "inline")?;
        Ok(Self { record })
    }

    /// Build from explicit PEM file paths.
    pub fn from_files(
        key_id: impl Into<String>,
        private_path: Option<&Path>,
        public_path: &Path,
    ) -> Result<Self, KeyStoreError> {
        let key_id = key_id.into();
        let read = |path: &Path| {
            std::fs::read_to_string(path).map_err(|e| KeyStoreError::InvalidKeyMaterial {
                key_id: key_id.clone(),
                reason: format!("reading {}: {e}", path.display()),
            })
        };
        let private_pem = private_path.map(read).transpose()?;
        let public_pem = read(public_path)?;
        Self::from_pem(key_id, private_pem, public_pem)
    }

    pub fn key_id(&self) -> &str {
        &self.record.key_id
    }
}

#[async_trait]
impl KeyBackend for InlineKeyBackend {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::ProcessLifetime
    }

    async fn fetch(&self, key_id: &str) -> Result<Option<KeyRecord>, BackendError> {
        if key_id == self.record.key_id {
            Ok(Some(self.record.clone()))
        } else {
            Ok(None)
        }
    }
}
