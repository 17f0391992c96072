//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};

use warden_auth::keys::InlineKeyBackend;
use warden_auth::{AuthConfig, KeyBackend, KeyStore};
use warden_core::Clock;

use crate::vault::{VaultConfig, VaultKeyBackend};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Where the file/inline backend gets its PEM pair.
#[derive(Clone, PartialEq, Eq)]
pub enum PemSource {
    Files {
        private: Option<PathBuf>,
        public: PathBuf,
    },
    Inline {
        private: Option<String>,
        public: String,
    },
}

impl core::fmt::Debug for PemSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PemSource::Files { private, public } => f
                .debug_struct("Files")
                .field("private", private)
                .field("public", public)
                .finish(),
            PemSource::Inline { private, .. } => f
                .debug_struct("Inline")
                .field("private", &private.as_ref().map(|_| "<redacted>"))
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySources {
    pub vault: Option<VaultConfig>,
    pub pem: Option<PemSource>,
}

impl KeySources {
    /// Backends in lookup order: vault first, then the configured PEM pair.
    pub fn backends(&self, key_id: &str) -> anyhow::Result<Vec<Arc<dyn KeyBackend>>> {
        let mut backends: Vec<Arc<dyn KeyBackend>> = Vec::new();

        if let Some(vault) = &self.vault {
            let backend = VaultKeyBackend::new(vault.clone()).context("configuring vault backend")?;
            backends.push(Arc::new(backend));
        }

        match &self.pem {
            Some(PemSource::Files { private, public }) => {
                let backend = InlineKeyBackend::from_files(key_id, private.as_deref(), public)
                    .context("loading JWT key files")?;
                backends.push(Arc::new(backend));
            }
            Some(PemSource::Inline { private, public }) => {
                let backend = InlineKeyBackend::from_pem(key_id, private.clone(), public.clone())
                    .context("parsing inline JWT keys")?;
                backends.push(Arc::new(backend));
            }
            None => {}
        }

        if backends.is_empty() {
            bail!("no JWT key source configured: enable vault or provide JWT_PUBLIC_KEY(_PATH)");
        }
        Ok(backends)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Absent means in-memory repositories.
    pub database_url: Option<String>,
    pub auth: AuthConfig,
    pub keys: KeySources,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AppConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let bind_addr = env
            .get("WARDEN_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("WARDEN_BIND_ADDR is not a socket address")?;

        let mut auth = AuthConfig::default();
        if let Some(issuer) = env.get("JWT_ISSUER") {
            auth.issuer = issuer;
        }
        if let Some(key_id) = env.get("JWT_KEY_ID") {
            auth.keys.default_key_id = key_id;
        }
        auth.access_token_ttl = env.secs("ACCESS_TOKEN_TTL_SECS", auth.access_token_ttl)?;
        auth.refresh_token_ttl = env.secs("REFRESH_TOKEN_TTL_SECS", auth.refresh_token_ttl)?;
        auth.service_token_ttl = env.secs("SERVICE_TOKEN_TTL_SECS", auth.service_token_ttl)?;
        auth.service_token_max_ttl =
            env.secs("SERVICE_TOKEN_MAX_TTL_SECS", auth.service_token_max_ttl)?;
        if auth.service_token_ttl > auth.service_token_max_ttl {
            bail!(
                "SERVICE_TOKEN_TTL_SECS ({}) exceeds SERVICE_TOKEN_MAX_TTL_SECS ({})",
                auth.service_token_ttl.as_secs(),
                auth.service_token_max_ttl.as_secs()
            );
        }

        let vault = if env.flag("VAULT_ENABLED")? {
            let addr = env.require("VAULT_ADDR")?;
            let token = env.require("VAULT_TOKEN")?;
            let mut vault = VaultConfig::new(addr, token);
            if let Some(mount) = env.get("VAULT_MOUNT") {
                vault.mount = mount;
            }
            vault.timeout = env.millis("VAULT_TIMEOUT_MS", vault.timeout)?;
            auth.keys.fetch_timeout = vault.timeout;
            vault.not_found_ttl = env.secs("VAULT_NOT_FOUND_TTL_SECS", vault.not_found_ttl)?;
            Some(vault)
        } else {
            None
        };

        Ok(Self {
            bind_addr,
            database_url: env.get("DATABASE_URL"),
            auth,
            keys: KeySources {
                vault,
                pem: pem_source(&env)?,
            },
        })
    }

    /// Key store over every configured backend.
    pub fn key_store(&self, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<KeyStore>> {
        let backends = self.keys.backends(&self.auth.keys.default_key_id)?;
        Ok(Arc::new(KeyStore::new(backends, self.auth.keys.clone(), clock)))
    }
}

fn pem_source<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> anyhow::Result<Option<PemSource>> {
    let private_path = env.get("JWT_PRIVATE_KEY_PATH").map(PathBuf::from);
    if let Some(public) = env.get("JWT_PUBLIC_KEY_PATH") {
        return Ok(Some(PemSource::Files {
            private: private_path,
            public: PathBuf::from(public),
        }));
    }
    if private_path.is_some() {
        bail!("JWT_PRIVATE_KEY_PATH requires JWT_PUBLIC_KEY_PATH");
    }

    let private = env.get("JWT_PRIVATE_KEY").map(|pem| unescape_pem(&pem));
    match env.get("JWT_PUBLIC_KEY") {
        Some(public) => Ok(Some(PemSource::Inline {
            private,
            public: unescape_pem(&public),
        })),
        None if private.is_some() => bail!("JWT_PRIVATE_KEY requires JWT_PUBLIC_KEY"),
        None => Ok(None),
    }
}

/// Single-line env values commonly carry `\n` escapes instead of newlines.
fn unescape_pem(raw: &str) -> String {
    raw.replace("\\n", "\n")
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Unset and blank are treated the same.
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &str) -> anyhow::Result<String> {
        self.get(name)
            .with_context(|| format!("{name} must be set when VAULT_ENABLED=true"))
    }

    fn flag(&self, name: &str) -> anyhow::Result<bool> {
        match self.get(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => bail!("{name} must be a boolean, got '{v}'"),
            },
        }
    }

    fn number(&self, name: &str) -> anyhow::Result<Option<u64>> {
        self.get(name)
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("{name} must be a non-negative integer, got '{v}'"))
            })
            .transpose()
    }

    fn secs(&self, name: &str, default: Duration) -> anyhow::Result<Duration> {
        match self.number(name)? {
            Some(0) => bail!("{name} must be positive"),
            Some(secs) => Ok(Duration::from_secs(secs)),
            None => Ok(default),
        }
    }

    fn millis(&self, name: &str, default: Duration) -> anyhow::Result<Duration> {
        match self.number(name)? {
            Some(0) => bail!("{name} must be positive"),
            Some(ms) => Ok(Duration::from_millis(ms)),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use warden_auth::testing::{PRIMARY_PRIVATE_PEM, PRIMARY_PUBLIC_PEM};
    use warden_core::SystemClock;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[("JWT_PUBLIC_KEY", PRIMARY_PUBLIC_PEM)]).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse::<SocketAddr>().unwrap());
        assert_eq!(config.database_url, None);
        assert_eq!(config.auth, AuthConfig::default());
        assert_eq!(config.keys.vault, None);
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("WARDEN_BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/warden"),
            ("JWT_ISSUER", "acme"),
            ("JWT_KEY_ID", "2024-q1"),
            ("ACCESS_TOKEN_TTL_SECS", "60"),
            ("SERVICE_TOKEN_TTL_SECS", "600"),
            ("SERVICE_TOKEN_MAX_TTL_SECS", "1200"),
            ("JWT_PUBLIC_KEY", PRIMARY_PUBLIC_PEM),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/warden"));
        assert_eq!(config.auth.issuer, "acme");
        assert_eq!(config.auth.keys.default_key_id, "2024-q1");
        assert_eq!(config.auth.access_token_ttl, Duration::from_secs(60));
        assert_eq!(config.auth.service_token_ttl, Duration::from_secs(600));
        assert_eq!(config.auth.service_token_max_ttl, Duration::from_secs(1200));
    }

    #[test]
    fn key_paths_take_precedence_over_inline_pems() {
        let config = load(&[
            ("JWT_PUBLIC_KEY_PATH", "/etc/warden/public.pem"),
            ("JWT_PUBLIC_KEY", PRIMARY_PUBLIC_PEM),
        ])
        .unwrap();
        assert_eq!(
            config.keys.pem,
            Some(PemSource::Files {
                private: None,
                public: PathBuf::from("/etc/warden/public.pem"),
            })
        );
    }

    #[test]
    fn vault_requires_address_and_token() {
        let err = load(&[("VAULT_ENABLED", "true"), ("VAULT_TOKEN", "t")]).unwrap_err();
        assert!(err.to_string().contains("VAULT_ADDR"));

        let config = load(&[
            ("VAULT_ENABLED", "1"),
            ("VAULT_ADDR", "http://vault:8200"),
            ("VAULT_TOKEN", "t"),
            ("VAULT_MOUNT", "kv"),
            ("VAULT_TIMEOUT_MS", "750"),
            ("VAULT_NOT_FOUND_TTL_SECS", "5"),
        ])
        .unwrap();
        let vault = config.keys.vault.unwrap();
        assert_eq!(vault.mount, "kv");
        assert_eq!(vault.timeout, Duration::from_millis(750));
        assert_eq!(vault.not_found_ttl, Duration::from_secs(5));
        assert_eq!(config.auth.keys.fetch_timeout, Duration::from_millis(750));
    }

    #[test]
    fn invalid_values_fail_with_the_variable_name() {
        for (name, value) in [
            ("ACCESS_TOKEN_TTL_SECS", "soon"),
            ("ACCESS_TOKEN_TTL_SECS", "0"),
            ("WARDEN_BIND_ADDR", "localhost"),
            ("VAULT_ENABLED", "maybe"),
        ] {
            let err = load(&[(name, value)]).unwrap_err();
            assert!(format!("{err:#}").contains(name), "{name}={value}: {err:#}");
        }
    }

    #[test]
    fn service_ttl_above_ceiling_is_rejected() {
        let err = load(&[
            ("SERVICE_TOKEN_TTL_SECS", "7200"),
            ("SERVICE_TOKEN_MAX_TTL_SECS", "3600"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("SERVICE_TOKEN_MAX_TTL_SECS"));
    }

    #[test]
    fn lone_private_key_is_rejected() {
        assert!(load(&[("JWT_PRIVATE_KEY", PRIMARY_PRIVATE_PEM)]).is_err());
        assert!(load(&[("JWT_PRIVATE_KEY_PATH", "/tmp/k.pem")]).is_err());
    }

    #[tokio::test]
    async fn escaped_inline_pems_build_a_signing_store() {
        let private = PRIMARY_PRIVATE_PEM.replace('\n', "\\n");
        let public = PRIMARY_PUBLIC_PEM.replace('\n', "\\n");
        let config = load(&[
            ("JWT_KEY_ID", "env"),
            ("JWT_PRIVATE_KEY", private.as_str()),
            ("JWT_PUBLIC_KEY", public.as_str()),
        ])
        .unwrap();
        let store = config.key_store(Arc::new(SystemClock)).unwrap();
        let material = store.warm_up().await.unwrap();
        assert_eq!(material.key_id(), "env");
        assert!(material.can_sign());
    }

    #[test]
    fn no_key_source_fails_startup() {
        let config = load(&[]).unwrap();
        assert!(config.key_store(Arc::new(SystemClock)).is_err());
    }

    #[test]
    fn debug_redacts_inline_private_key() {
        let config = load(&[
            ("JWT_PRIVATE_KEY", PRIMARY_PRIVATE_PEM),
            ("JWT_PUBLIC_KEY", PRIMARY_PUBLIC_PEM),
        ])
        .unwrap();
        assert!(!format!("{config:?}").contains("PRIVATE KEY"));
    }
}
