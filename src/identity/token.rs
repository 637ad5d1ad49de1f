//! Signed, time-bounded bearer tokens for the JSON API. The issuer owns the
//! process-wide signing key, loaded once at startup; tokens are opaque
//! strings to every other component. Verification is signature + expiry +
//! issuer only; there is no revocation list.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::identity::{Claims, Principal};

const TOKEN_SUBJECT: &str = "Wiki API";
const TOKEN_ISSUER: &str = "mdwiki";

/// Claim set carried in issued tokens: the registered fields plus the
/// username and the three capability booleans, frozen at issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiClaims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub username: String,
    #[serde(rename = "canCreate")]
    pub can_create: bool,
    #[serde(rename = "canDelete")]
    pub can_delete: bool,
    #[serde(rename = "canUpdate")]
    pub can_update: bool,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    /// Mint a token for the given user with the claims resolved at login.
    pub fn issue(&self, username: &str, claims: &Claims) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let wiki_claims = WikiClaims {
            sub: TOKEN_SUBJECT.to_string(),
            iss: TOKEN_ISSUER.to_string(),
            iat: now,
            exp: now + self.ttl_secs as i64,
            username: username.to_string(),
            can_create: claims.can_create,
            can_delete: claims.can_delete,
            can_update: claims.can_update,
        };
        encode(&Header::new(Algorithm::HS256), &wiki_claims, &self.encoding)
            .map_err(|e| AppError::internal("token_encode".into(), e.to_string()))
    }

    /// Verify a presented token and rebuild the Principal it encodes. Every
    /// failure mode (bad signature, expiry, wrong issuer/subject, garbage
    /// input) surfaces as a single Auth failure.
    pub fn verify(&self, token: &str) -> AppResult<Principal> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.sub = Some(TOKEN_SUBJECT.to_string());
        let data = decode::<WikiClaims>(token, &self.decoding, &validation)
            .map_err(|e| AppError::auth("invalid_token".into(), e.to_string()))?;
        let claims = data.claims;
        Ok(Principal {
            username: claims.username,
            claims: Claims {
                can_create: claims.can_create,
                can_update: claims.can_update,
                can_delete: claims.can_delete,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_claims() -> Claims {
        Claims { can_create: true, can_update: true, can_delete: true }
    }

    #[test]
    fn issue_then_verify_preserves_claims() {
        let issuer = TokenIssuer::new("test-secret", 60);
        let token = issuer.issue("foo", &all_claims()).unwrap();
        let principal = issuer.verify(&token).unwrap();
        assert_eq!(principal.username, "foo");
        assert!(principal.claims.can_create);
        assert!(principal.claims.can_update);
        assert!(principal.claims.can_delete);
    }

    #[test]
    fn wrong_key_fails_verification() {
        let issuer = TokenIssuer::new("test-secret", 60);
        let other = TokenIssuer::new("other-secret", 60);
        let token = issuer.issue("foo", &all_claims()).unwrap();
        let err = other.verify(&token).unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn expired_token_fails_verification() {
        let issuer = TokenIssuer::new("test-secret", 0);
        let token = issuer.issue("foo", &all_claims()).unwrap();
        // jsonwebtoken applies a default leeway; shrink it to zero by
        // decoding with our own validation via a fresh issuer whose ttl has
        // already elapsed.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&["mdwiki"]);
        validation.sub = Some("Wiki API".to_string());
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let result = decode::<WikiClaims>(
            &token,
            &DecodingKey::from_secret("test-secret".as_bytes()),
            &validation,
        );
        assert!(result.is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let issuer = TokenIssuer::new("test-secret", 60);
        assert!(issuer.verify("not-a-token").is_err());
    }

    #[test]
    fn claims_are_frozen_at_issuance() {
        let issuer = TokenIssuer::new("test-secret", 60);
        let token = issuer
            .issue("foo", &Claims { can_create: false, can_update: true, can_delete: false })
            .unwrap();
        // later grant changes do not alter what the token decodes to
        let principal = issuer.verify(&token).unwrap();
        assert!(!principal.claims.can_create);
        assert!(principal.claims.can_update);
        assert!(!principal.claims.can_delete);
    }
}
