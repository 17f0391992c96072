//! Token validation.
//!
//! Steps run in a fixed order and stop at the first failure:
//!
//! 1. decode the header, take `kid` (or the configured default)
//! 2. resolve the verification key      → `KeyUnavailable`
//! 3. verify the RS256 signature         → `SignatureInvalid`
//! 4. check `exp` with zero grace        → `TokenExpired`
//! 5. check `type` against the expected  → `WrongTokenType`
//! 6. structural checks for that type    → `MalformedClaims` / `UntrustedIssuer`

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde_json::Value;

use warden_core::Clock;

use crate::claims::{ClaimBody, TokenClaims, TokenType, validate_time_window};
use crate::config::AuthConfig;
use crate::error::TokenError;
use crate::keys::KeyStore;

pub struct TokenValidator {
    key_store: Arc<KeyStore>,
    config: AuthConfig,
    clock: Arc<dyn Clock>,
}

impl TokenValidator {
    pub fn new(key_store: Arc<KeyStore>, config: AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            key_store,
            config,
            clock,
        }
    }

    /// Validate `raw` and require it to be of `expected` type.
    pub async fn validate(&self, raw: &str, expected: TokenType) -> Result<TokenClaims, TokenError> {
        self.validate_with(raw, &[expected]).await
    }

    /// Validate `raw`, accepting any of the `accepted` types.
    pub async fn validate_with(
        &self,
        raw: &str,
        accepted: &[TokenType],
    ) -> Result<TokenClaims, TokenError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TokenError::MissingToken);
        }

        // (1) header
        let header = jsonwebtoken::decode_header(raw)
            .map_err(|e| TokenError::MalformedToken(e.to_string()))?;
        let key_id = header
            .kid
            .unwrap_or_else(|| self.key_store.default_key_id().to_string());

        // (2) key
        let key = self
            .key_store
            .get_verification_key(&key_id)
            .await
            .map_err(TokenError::KeyUnavailable)?;

        // (3) signature; time and audience are checked below, in order.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let payload = jsonwebtoken::decode::<Value>(raw, key.decoding_key(), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::SignatureInvalid
                }
                _ => TokenError::MalformedToken(e.to_string()),
            })?
            .claims;

        // (4) expiry
        let exp = payload
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| TokenError::malformed_claims("missing exp"))?;
        let now = self.clock.now_epoch_seconds();
        if now >= exp {
            return Err(TokenError::TokenExpired);
        }

        // (5) type
        let actual = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| TokenError::malformed_claims("missing type"))?;
        match TokenType::parse(actual) {
            Some(t) if accepted.contains(&t) => {}
            _ => {
                return Err(TokenError::WrongTokenType {
                    expected: expected_label(accepted),
                    actual: actual.to_string(),
                });
            }
        }

        // (6) structure
        let claims: TokenClaims = serde_json::from_value(payload)
            .map_err(|e| TokenError::malformed_claims(e.to_string()))?;
        self.check_structure(&claims, now)?;

        Ok(claims)
    }

    fn check_structure(&self, claims: &TokenClaims, now: i64) -> Result<(), TokenError> {
        if claims.sub.trim().is_empty() {
            return Err(TokenError::malformed_claims(match claims.token_type() {
                TokenType::Service => "missing service ID",
                TokenType::Access | TokenType::Refresh => "missing user ID",
            }));
        }
        validate_time_window(claims.iat, claims.exp, now)?;

        if claims.iss != self.config.issuer {
            return Err(TokenError::UntrustedIssuer);
        }

        if let ClaimBody::Service(service) = &claims.body {
            if service.aud.trim().is_empty() {
                return Err(TokenError::malformed_claims("missing aud"));
            }
            if let Some(audience) = &self.config.audience {
                if &service.aud != audience {
                    return Err(TokenError::malformed_claims("audience mismatch"));
                }
            }
            if service.user_permissions.is_some() && service.user_id.is_none() {
                return Err(TokenError::malformed_claims(
                    "user_permissions without user_id",
                ));
            }
        }
        Ok(())
    }
}

fn expected_label(accepted: &[TokenType]) -> String {
    accepted
        .iter()
        .map(TokenType::as_str)
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;
    use warden_core::ManualClock;

    use super::*;
    use crate::issuer::{TokenIssuer, UserContext};
    use crate::testing;
    use crate::Permission;

    struct Fixture {
        clock: Arc<ManualClock>,
        issuer: TokenIssuer,
        validator: TokenValidator,
    }

    fn fixture_with(config: AuthConfig) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = testing::inline_key_store("main", dyn_clock.clone());
        Fixture {
            clock,
            issuer: TokenIssuer::new(store.clone(), config.clone(), dyn_clock.clone()),
            validator: TokenValidator::new(store, config, dyn_clock),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(AuthConfig::default())
    }

    fn sign_raw(kid: Option<&str>, payload: Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        let key = EncodingKey::from_rsa_pem(testing::PRIMARY_PRIVATE_PEM.as_bytes()).unwrap();
        jsonwebtoken::encode(&header, &payload, &key).unwrap()
    }

    #[tokio::test]
    async fn access_token_round_trips() {
        let f = fixture();
        let perms = vec![Permission::new("a:b:view")];
        let token = f
            .issuer
            .issue_access_token("user-1", "u@example.com", &perms)
            .await
            .unwrap();

        let claims = f.validator.validate(&token, TokenType::Access).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.permissions(), perms.as_slice());
        assert_eq!(claims.exp, f.clock.now_epoch_seconds() + 900);
    }

    #[tokio::test]
    async fn expiry_has_zero_grace() {
        let f = fixture();
        let token = f.issuer.issue_access_token("user-1", "", &[]).await.unwrap();

        f.clock.advance(chrono::Duration::seconds(899));
        assert!(f.validator.validate(&token, TokenType::Access).await.is_ok());

        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(
            f.validator.validate(&token, TokenType::Access).await.unwrap_err(),
            TokenError::TokenExpired
        );
    }

    #[tokio::test]
    async fn expiry_is_checked_before_type() {
        let f = fixture();
        let token = f.issuer.issue_refresh_token("user-1").await.unwrap();
        f.clock.advance(chrono::Duration::days(8));
        assert_eq!(
            f.validator.validate(&token, TokenType::Access).await.unwrap_err(),
            TokenError::TokenExpired
        );
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let f = fixture();
        let token = f.issuer.issue_refresh_token("user-1").await.unwrap();
        let err = f.validator.validate(&token, TokenType::Access).await.unwrap_err();
        assert_eq!(
            err,
            TokenError::WrongTokenType {
                expected: "access".to_string(),
                actual: "refresh".to_string()
            }
        );
        assert!(f.validator.validate(&token, TokenType::Refresh).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_kid_is_key_unavailable_not_signature_invalid() {
        let f = fixture();
        let now = f.clock.now_epoch_seconds();
        let token = sign_raw(
            Some("retired-2023"),
            json!({"sub": "u", "type": "access", "iat": now, "exp": now + 60, "iss": "warden"}),
        );
        let err = f.validator.validate(&token, TokenType::Access).await.unwrap_err();
        assert!(matches!(err, TokenError::KeyUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_kid_uses_default_key() {
        let f = fixture();
        let now = f.clock.now_epoch_seconds();
        let token = sign_raw(
            None,
            json!({"sub": "u", "type": "access", "iat": now, "exp": now + 60, "iss": "warden"}),
        );
        assert!(f.validator.validate(&token, TokenType::Access).await.is_ok());
    }

    #[tokio::test]
    async fn foreign_signature_is_rejected() {
        let f = fixture();
        let now = f.clock.now_epoch_seconds();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("main".to_string());
        let foreign = EncodingKey::from_rsa_pem(testing::SECONDARY_PRIVATE_PEM.as_bytes()).unwrap();
        let token = jsonwebtoken::encode(
            &header,
            &json!({"sub": "u", "type": "access", "iat": now, "exp": now + 60, "iss": "warden"}),
            &foreign,
        )
        .unwrap();
        assert_eq!(
            f.validator.validate(&token, TokenType::Access).await.unwrap_err(),
            TokenError::SignatureInvalid
        );
    }

    #[tokio::test]
    async fn hs256_token_is_rejected_as_bad_signature() {
        let f = fixture();
        let now = f.clock.now_epoch_seconds();
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("main".to_string());
        let token = jsonwebtoken::encode(
            &header,
            &json!({"sub": "u", "type": "access", "iat": now, "exp": now + 60, "iss": "warden"}),
            &EncodingKey::from_secret(testing::PRIMARY_PUBLIC_PEM.as_bytes()),
        )
        .unwrap();
        assert_eq!(
            f.validator.validate(&token, TokenType::Access).await.unwrap_err(),
            TokenError::SignatureInvalid
        );
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let f = fixture();
        let err = f.validator.validate("not-a-jwt", TokenType::Access).await.unwrap_err();
        assert!(matches!(err, TokenError::MalformedToken(_)));
        assert_eq!(
            f.validator.validate("  ", TokenType::Access).await.unwrap_err(),
            TokenError::MissingToken
        );
    }

    #[tokio::test]
    async fn empty_subject_is_malformed_claims() {
        let f = fixture();
        let now = f.clock.now_epoch_seconds();
        let token = sign_raw(
            Some("main"),
            json!({"type": "service", "aud": "x", "iat": now, "exp": now + 60, "iss": "warden"}),
        );
        assert_eq!(
            f.validator.validate(&token, TokenType::Service).await.unwrap_err(),
            TokenError::malformed_claims("missing service ID")
        );
    }

    #[tokio::test]
    async fn foreign_issuer_is_untrusted() {
        let f = fixture();
        let now = f.clock.now_epoch_seconds();
        let token = sign_raw(
            Some("main"),
            json!({"sub": "u", "type": "access", "iat": now, "exp": now + 60, "iss": "elsewhere"}),
        );
        assert_eq!(
            f.validator.validate(&token, TokenType::Access).await.unwrap_err(),
            TokenError::UntrustedIssuer
        );
    }

    #[tokio::test]
    async fn service_token_carries_user_context() {
        let f = fixture();
        let token = f
            .issuer
            .issue_service_token(
                "svc-x",
                "assets",
                &[Permission::new("assets:read")],
                Duration::from_secs(60),
                Some(UserContext {
                    user_id: "user-1".to_string(),
                    permissions: vec![Permission::new("a:b:view")],
                }),
            )
            .await
            .unwrap();
        let claims = f.validator.validate(&token, TokenType::Service).await.unwrap();
        let ClaimBody::Service(body) = claims.body else {
            panic!("expected service claims");
        };
        assert_eq!(body.user_id.as_deref(), Some("user-1"));
        assert_eq!(body.user_permissions, Some(vec![Permission::new("a:b:view")]));
    }

    #[tokio::test]
    async fn configured_audience_is_enforced_for_service_tokens() {
        let f = fixture_with(AuthConfig {
            audience: Some("billing".to_string()),
            ..AuthConfig::default()
        });
        let token = f
            .issuer
            .issue_service_token("svc-x", "assets", &[], Duration::from_secs(60), None)
            .await
            .unwrap();
        let err = f.validator.validate(&token, TokenType::Service).await.unwrap_err();
        assert!(matches!(err, TokenError::MalformedClaims(_)));
    }

    #[tokio::test]
    async fn validate_with_accepts_any_listed_type() {
        let f = fixture();
        let token = f
            .issuer
            .issue_service_token("svc", "assets", &[], Duration::from_secs(60), None)
            .await
            .unwrap();
        let claims = f
            .validator
            .validate_with(&token, &[TokenType::Service, TokenType::Access])
            .await
            .unwrap();
        assert_eq!(claims.token_type(), TokenType::Service);
    }
}
