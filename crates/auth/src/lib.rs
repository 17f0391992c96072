//! `warden-auth`: token trust core and authorization engine.
//!
//! This crate is intentionally decoupled from HTTP and storage: key backends
//! and repositories are traits, with in-memory implementations here and
//! network/database adapters in `warden-infra`.

pub mod authorize;
pub mod claims;
pub mod config;
pub mod engine;
pub mod error;
pub mod issuer;
pub mod keys;
pub mod manager;
pub mod permissions;
pub mod principal;
pub mod service;
pub mod session;
pub mod validator;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use authorize::PermissionChecker;
pub use claims::{ClaimBody, TokenClaims, TokenType};
pub use config::AuthConfig;
pub use engine::{AccessRequest, AuthorizationEngine, Decision};
pub use error::{
    AuthFailure, BackendError, CredentialError, EngineError, IssueError, KeyStoreError,
    RepositoryError, SessionError, TokenError,
};
pub use issuer::{TokenIssuer, UserContext};
pub use keys::{KeyBackend, KeyMaterial, KeyRecord, KeyStore, KeyStoreConfig};
pub use manager::AuthorizationManager;
pub use permissions::Permission;
pub use principal::{PrincipalDecoder, PrincipalType, RequestPrincipal};
pub use service::{ServiceCredentialStore, ServicePrincipal, ServiceRegistration, ServiceTokenGrant};
pub use session::{SessionService, SessionTokens, UserDirectory, UserRecord, UserStatus};
pub use validator::TokenValidator;
