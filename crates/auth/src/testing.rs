//! Test fixtures: deterministic RSA keys and a scriptable key backend.
//!
//! Compiled for this crate's tests and for dependents enabling `test-util`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use warden_core::Clock;

use crate::error::BackendError;
use crate::keys::{CachePolicy, InlineKeyBackend, KeyBackend, KeyRecord, KeyStore, KeyStoreConfig};

pub const PRIMARY_PRIVATE_PEM: &str = include_str!("../testdata/primary_private.pem");
pub const PRIMARY_PUBLIC_PEM: &str = include_str!("../testdata/primary_public.pem");
pub const SECONDARY_PRIVATE_PEM: &str = include_str!("../testdata/secondary_private.pem");
pub const SECONDARY_PUBLIC_PEM: &str = include_str!("../testdata/secondary_public.pem");

pub fn primary_record(key_id: &str) -> KeyRecord {
    KeyRecord {
        key_id: key_id.to_string(),
        private_pem: Some(PRIMARY_PRIVATE_PEM.to_string()),
        public_pem: PRIMARY_PUBLIC_PEM.to_string(),
    }
}

pub fn secondary_record(key_id: &str) -> KeyRecord {
    KeyRecord {
        key_id: key_id.to_string(),
        private_pem: Some(SECONDARY_PRIVATE_PEM.to_string()),
        public_pem: SECONDARY_PUBLIC_PEM.to_string(),
    }
}

pub fn primary_inline_backend(key_id: &str) -> InlineKeyBackend {
    InlineKeyBackend::from_pem(
        key_id,
        Some(PRIMARY_PRIVATE_PEM.to_string()),
        PRIMARY_PUBLIC_PEM,
    )
    .expect("primary fixture parses")
}

/// Key store holding the primary pair under `key_id`, which is also the default.
pub fn inline_key_store(key_id: &str, clock: Arc<dyn Clock>) -> Arc<KeyStore> {
    Arc::new(KeyStore::new(
        vec![Arc::new(primary_inline_backend(key_id))],
        KeyStoreConfig {
            default_key_id: key_id.to_string(),
            ..KeyStoreConfig::default()
        },
        clock,
    ))
}

#[derive(Debug, Clone)]
pub enum BackendMode {
    Serve(KeyRecord),
    Fail(BackendError),
    /// Never answers; exercises the fetch timeout.
    Hang,
}

/// Key backend whose behaviour can be switched mid-test; counts fetches.
pub struct ScriptedBackend {
    mode: Mutex<BackendMode>,
    policy: CachePolicy,
    delay: Option<Duration>,
    fetch_count: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(mode: BackendMode, policy: CachePolicy) -> Self {
        Self {
            mode: Mutex::new(mode),
            policy,
            delay: None,
            fetch_count: AtomicUsize::new(0),
        }
    }

    /// Behaves like a vault: serves the primary pair with a 5 minute TTL.
    pub fn vault_serving(key_id: &str) -> Self {
        Self::new(
            BackendMode::Serve(primary_record(key_id)),
            CachePolicy::Ttl(Duration::from_secs(300)),
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_mode(&self, mode: BackendMode) {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    pub fn fetches(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn cache_policy(&self) -> CachePolicy {
        self.policy
    }

    async fn fetch(&self, key_id: &str) -> Result<Option<KeyRecord>, BackendError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mode = self.mode.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match mode {
            BackendMode::Serve(record) if record.key_id == key_id => Ok(Some(record)),
            BackendMode::Serve(_) => Ok(None),
            BackendMode::Fail(err) => Err(err),
            BackendMode::Hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }
}
