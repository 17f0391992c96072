//! Service wiring: key store, repositories and the auth services built on them.

use std::sync::Arc;

use anyhow::Context;

use warden_auth::engine::{InMemoryRbacRepository, OwnershipPolicy, RbacRepository};
use warden_auth::service::{InMemoryServicePrincipalRepository, SecretHasher, ServicePrincipalRepository};
use warden_auth::session::InMemoryUserDirectory;
use warden_auth::{
    AuthConfig, AuthorizationEngine, AuthorizationManager, KeyStore, PrincipalDecoder,
    ServiceCredentialStore, SessionService, TokenIssuer, TokenValidator, UserDirectory,
};
use warden_core::{Clock, SystemClock};
use warden_infra::AppConfig;
use warden_infra::postgres::{
    self, PostgresRbacRepository, PostgresServicePrincipalRepository, PostgresUserDirectory,
};

/// Persistence behind the auth services.
#[derive(Clone)]
pub struct Stores {
    pub rbac: Arc<dyn RbacRepository>,
    pub services: Arc<dyn ServicePrincipalRepository>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            rbac: Arc::new(InMemoryRbacRepository::new()),
            services: Arc::new(InMemoryServicePrincipalRepository::new()),
            users: Arc::new(InMemoryUserDirectory::new()),
        }
    }

    pub async fn postgres(database_url: &str) -> anyhow::Result<Self> {
        let pool = postgres::connect(database_url)
            .await
            .context("connecting to DATABASE_URL")?;
        postgres::migrate(&pool).await.context("applying schema")?;

        Ok(Self {
            rbac: Arc::new(PostgresRbacRepository::new(pool.clone())),
            services: Arc::new(PostgresServicePrincipalRepository::new(pool.clone())),
            users: Arc::new(PostgresUserDirectory::new(pool)),
        })
    }
}

pub struct AppServices {
    pub manager: Arc<AuthorizationManager>,
    pub sessions: Arc<SessionService>,
    pub credentials: Arc<ServiceCredentialStore>,
    pub engine: Arc<AuthorizationEngine>,
}

impl AppServices {
    pub fn new(
        key_store: Arc<KeyStore>,
        config: AuthConfig,
        stores: Stores,
        hasher: SecretHasher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let issuer = Arc::new(TokenIssuer::new(key_store.clone(), config.clone(), clock.clone()));
        let validator = Arc::new(TokenValidator::new(key_store, config, clock.clone()));
        let decoder = Arc::new(PrincipalDecoder::new(validator.clone()));

        let engine = Arc::new(
            AuthorizationEngine::new(stores.rbac, clock.clone())
                .with_policy(Arc::new(OwnershipPolicy::new())),
        );

        Self {
            manager: Arc::new(AuthorizationManager::new(decoder)),
            sessions: Arc::new(SessionService::new(
                issuer.clone(),
                validator,
                engine.clone(),
                stores.users,
            )),
            credentials: Arc::new(ServiceCredentialStore::new(
                stores.services,
                issuer,
                hasher,
                clock,
            )),
            engine,
        }
    }
}

/// Production wiring from environment configuration.
///
/// Fails when no signing key can be resolved, so a broken deployment never
/// starts serving.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let key_store = config.key_store(clock.clone())?;
    let material = key_store
        .warm_up()
        .await
        .context("resolving the default signing key")?;
    tracing::info!(
        key_id = material.key_id(),
        backend = material.source(),
        "signing key ready"
    );

    let stores = match &config.database_url {
        Some(url) => Stores::postgres(url).await?,
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores");
            Stores::in_memory()
        }
    };

    Ok(AppServices::new(
        key_store,
        config.auth.clone(),
        stores,
        SecretHasher::default(),
        clock,
    ))
}
