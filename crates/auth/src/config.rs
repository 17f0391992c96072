//! Token policy configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::keys::KeyStoreConfig;

/// Lifetimes and identity of issued tokens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Fixed `iss` for every token this deployment issues and accepts.
    pub issuer: String,

    #[serde(with = "duration_secs")]
    pub access_token_ttl: Duration,

    #[serde(with = "duration_secs")]
    pub refresh_token_ttl: Duration,

    /// Lifetime used by the client-credentials grant.
    #[serde(with = "duration_secs")]
    pub service_token_ttl: Duration,

    /// Ceiling for any service token; requests above it are rejected, not clamped.
    #[serde(with = "duration_secs")]
    pub service_token_max_ttl: Duration,

    /// When set, service tokens must name this service in `aud`.
    pub audience: Option<String>,

    pub keys: KeyStoreConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "warden".to_string(),
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl: Duration::from_secs(604_800),
            service_token_ttl: Duration::from_secs(3600),
            service_token_max_ttl: Duration::from_secs(3600),
            audience: None,
            keys: KeyStoreConfig::default(),
        }
    }
}

/// Serde adapter: durations as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
