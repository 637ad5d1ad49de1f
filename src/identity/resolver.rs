//! Gateways from raw request credentials to a Principal. Two concrete
//! resolvers produce the same Principal shape so the claim-check gate is
//! written once:
//! - `SessionResolver`: session cookie -> username -> claims re-derived from
//!   the credential store on every request.
//! - `BearerResolver`: Authorization header -> token verification only, no
//!   credential-store round trip; the claims are whatever the token froze at
//!   issuance.

use axum::http::HeaderMap;
use sqlx::SqlitePool;

use crate::error::{AppError, AppResult};
use crate::identity::{Principal, SessionManager, TokenIssuer};
use crate::security;

pub const SESSION_COOKIE: &str = "mdwiki_session";

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name { return Some(v[1..].to_string()); }
        }
    }
    None
}

#[allow(async_fn_in_trait)]
pub trait CredentialResolver {
    async fn resolve(&self, headers: &HeaderMap) -> AppResult<Principal>;
}

pub struct SessionResolver<'a> {
    pub pool: &'a SqlitePool,
    pub sessions: &'a SessionManager,
}

impl CredentialResolver for SessionResolver<'_> {
    async fn resolve(&self, headers: &HeaderMap) -> AppResult<Principal> {
        let sid = parse_cookie(headers, SESSION_COOKIE)
            .ok_or_else(|| AppError::auth("no_session", "no session cookie"))?;
        let username = self
            .sessions
            .validate(&sid)
            .ok_or_else(|| AppError::auth("bad_session", "invalid or expired session"))?;
        let claims = security::resolve_claims(self.pool, &username).await;
        Ok(Principal { username, claims })
    }
}

pub struct BearerResolver<'a> {
    pub issuer: &'a TokenIssuer,
}

impl CredentialResolver for BearerResolver<'_> {
    async fn resolve(&self, headers: &HeaderMap) -> AppResult<Principal> {
        let value = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::auth("no_token", "missing Authorization header"))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::auth("bad_scheme", "expected a Bearer token"))?;
        self.issuer.verify(token.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parse_cookie_picks_the_named_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("other=1; mdwiki_session=abc123; trailing=x"),
        );
        assert_eq!(parse_cookie(&headers, SESSION_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(parse_cookie(&headers, "other").as_deref(), Some("1"));
        assert!(parse_cookie(&headers, "absent").is_none());
    }

    #[tokio::test]
    async fn session_resolver_rejects_missing_and_unknown_cookies() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::security::ensure_auth_tables(&pool).await.unwrap();
        let sessions = SessionManager::default();
        let resolver = SessionResolver { pool: &pool, sessions: &sessions };

        let empty = HeaderMap::new();
        assert_eq!(resolver.resolve(&empty).await.unwrap_err().http_status(), 401);

        let mut stale = HeaderMap::new();
        stale.insert(
            "cookie",
            HeaderValue::from_static("mdwiki_session=never-issued"),
        );
        assert_eq!(resolver.resolve(&stale).await.unwrap_err().http_status(), 401);
    }

    #[tokio::test]
    async fn bearer_resolver_rejects_missing_and_malformed_headers() {
        let issuer = TokenIssuer::new("test-secret", 60);
        let resolver = BearerResolver { issuer: &issuer };

        let empty = HeaderMap::new();
        assert_eq!(resolver.resolve(&empty).await.unwrap_err().http_status(), 401);

        let mut basic = HeaderMap::new();
        basic.insert("Authorization", HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(resolver.resolve(&basic).await.unwrap_err().http_status(), 401);
    }
}
