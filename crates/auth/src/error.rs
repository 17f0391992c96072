//! Error taxonomy for the trust core.
//!
//! Internal kinds stay distinct all the way up to [`AuthFailure`], which is the
//! only type that knows how to present itself to an untrusted caller.

use std::time::Duration;

use thiserror::Error;

use warden_core::{DomainError, RoleId};

use crate::Permission;

/// Failure reported by a single key backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("malformed key record: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// No backend produced the key and nothing usable is cached.
    #[error("no usable key material for key id '{key_id}': {reason}")]
    KeyUnavailable { key_id: String, reason: String },

    /// The key resolved, but only its public half is known.
    #[error("key '{0}' has no private key and cannot sign")]
    MissingPrivateKey(String),

    #[error("invalid key material for key id '{key_id}': {reason}")]
    InvalidKeyMaterial { key_id: String, reason: String },
}

impl KeyStoreError {
    pub fn unavailable(key_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyUnavailable {
            key_id: key_id.into(),
            reason: reason.into(),
        }
    }
}

/// Why a presented token was rejected.
///
/// Variants map one-to-one onto the validation steps so diagnostics can tell
/// them apart; callers facing the network must go through [`AuthFailure`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("no bearer token presented")]
    MissingToken,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("verification key unavailable: {0}")]
    KeyUnavailable(#[source] KeyStoreError),

    #[error("token signature is invalid")]
    SignatureInvalid,

    #[error("token has expired")]
    TokenExpired,

    #[error("wrong token type: expected {expected}, got {actual}")]
    WrongTokenType { expected: String, actual: String },

    #[error("token issuer is not trusted")]
    UntrustedIssuer,

    #[error("malformed claims: {0}")]
    MalformedClaims(String),
}

impl TokenError {
    /// Stable, low-cardinality label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::MissingToken => "missing_token",
            TokenError::MalformedToken(_) => "malformed_token",
            TokenError::KeyUnavailable(_) => "key_unavailable",
            TokenError::SignatureInvalid => "signature_invalid",
            TokenError::TokenExpired => "token_expired",
            TokenError::WrongTokenType { .. } => "wrong_token_type",
            TokenError::UntrustedIssuer => "untrusted_issuer",
            TokenError::MalformedClaims(_) => "malformed_claims",
        }
    }

    pub fn malformed_claims(msg: impl Into<String>) -> Self {
        Self::MalformedClaims(msg.into())
    }
}

/// Programming errors caught before a token is signed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssueError {
    #[error("cannot issue a token without a subject")]
    MissingSubject,

    #[error("cannot issue a service token without an audience")]
    MissingAudience,

    #[error("token lifetime must be positive")]
    InvalidLifetime,

    #[error("requested lifetime {requested}s exceeds the {ceiling}s ceiling")]
    LifetimeExceedsCeiling { requested: u64, ceiling: u64 },

    #[error(transparent)]
    Key(#[from] KeyStoreError),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Storage failure behind one of the repository traits.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("query failed: {0}")]
    Query(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown role {0}")]
    UnknownRole(RoleId),

    #[error(transparent)]
    InvalidAssignment(#[from] DomainError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Outcome of an authentication or authorization attempt, as seen by callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("authentication required: {0}")]
    AuthenticationRequired(#[source] TokenError),

    #[error("permission denied: {permission}")]
    AuthorizationDenied { permission: Permission },
}

impl AuthFailure {
    /// HTTP status the failure surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthFailure::AuthenticationRequired(_) => 401,
            AuthFailure::AuthorizationDenied { .. } => 403,
        }
    }

    /// Caller-visible message. Never includes identifiers or internal causes.
    pub fn public_message(&self) -> String {
        match self {
            AuthFailure::AuthenticationRequired(_) => "Authentication required".to_string(),
            AuthFailure::AuthorizationDenied { permission } => {
                format!("Permission denied: {permission}")
            }
        }
    }
}

impl From<TokenError> for AuthFailure {
    fn from(value: TokenError) -> Self {
        AuthFailure::AuthenticationRequired(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Unknown client, wrong secret and disabled principal all look the same.
    #[error("invalid client credentials")]
    InvalidCredentials,

    #[error("service '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("service '{0}' is not registered")]
    NotFound(String),

    #[error("invalid service id: {0}")]
    InvalidServiceId(String),

    #[error("secret hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Issue(#[from] IssueError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("user is unknown or inactive")]
    UserUnavailable,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Issue(#[from] IssueError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_collapse_to_two_statuses() {
        let unauthenticated = AuthFailure::from(TokenError::TokenExpired);
        assert_eq!(unauthenticated.status_code(), 401);
        assert_eq!(unauthenticated.public_message(), "Authentication required");

        let denied = AuthFailure::AuthorizationDenied {
            permission: Permission::new("a:b:edit"),
        };
        assert_eq!(denied.status_code(), 403);
        assert_eq!(denied.public_message(), "Permission denied: a:b:edit");
    }

    #[test]
    fn public_message_hides_internal_cause() {
        let failure = AuthFailure::from(TokenError::KeyUnavailable(KeyStoreError::unavailable(
            "rotated-2024",
            "vault sealed",
        )));
        let msg = failure.public_message();
        assert!(!msg.contains("rotated-2024"));
        assert!(!msg.contains("vault"));
    }
}
