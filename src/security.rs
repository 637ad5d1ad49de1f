//! Credential store and authenticator. Holds user records (argon2 PHC
//! password hashes) and role/permission grants, and derives per-user
//! capability claims from them. The tables are read-mostly: the server only
//! writes them when seeding defaults on first run.
//!
//! Claim derivation is three independent boolean lookups (create / update /
//! delete). Each lookup that fails defaults that one claim to false instead
//! of failing the whole resolution; this mirrors long-standing observable
//! behavior and must be preserved.

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::AppResult;
use crate::identity::Claims;

const CREATE_AUTH_TABLES: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS users (username TEXT PRIMARY KEY, password_hash TEXT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS user_roles (username TEXT NOT NULL, role TEXT NOT NULL, PRIMARY KEY (username, role))",
    "CREATE TABLE IF NOT EXISTS roles_perms (role TEXT NOT NULL, perm TEXT NOT NULL, PRIMARY KEY (role, perm))",
];

const SELECT_PASSWORD_HASH: &str = "SELECT password_hash FROM users WHERE username = ?";
const SELECT_PERM_COUNT: &str =
    "SELECT COUNT(*) FROM roles_perms rp JOIN user_roles ur ON ur.role = rp.role \
     WHERE ur.username = ? AND rp.perm = ?";

fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Create the credential tables if absent. Runs once before serving begins.
pub async fn ensure_auth_tables(pool: &SqlitePool) -> AppResult<()> {
    for ddl in CREATE_AUTH_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

/// Seed the default user on first run: `foo`/`bar` with the writer role
/// (create + update) and the editor role (delete). No-op once any user
/// exists.
pub async fn ensure_default_users(pool: &SqlitePool) -> AppResult<()> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }
    add_user(pool, "foo", "bar", &["writer", "editor"]).await?;
    for (role, perm) in [("writer", "create"), ("writer", "update"), ("editor", "delete")] {
        sqlx::query("INSERT OR IGNORE INTO roles_perms (role, perm) VALUES (?, ?)")
            .bind(role)
            .bind(perm)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Insert or replace a user and its role memberships.
pub async fn add_user(pool: &SqlitePool, username: &str, password: &str, roles: &[&str]) -> AppResult<()> {
    let phc = hash_password(password).map_err(crate::error::AppError::from)?;
    sqlx::query("INSERT OR REPLACE INTO users (username, password_hash) VALUES (?, ?)")
        .bind(username)
        .bind(&phc)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM user_roles WHERE username = ?")
        .bind(username)
        .execute(pool)
        .await?;
    for role in roles {
        sqlx::query("INSERT INTO user_roles (username, role) VALUES (?, ?)")
            .bind(username)
            .bind(role)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Grant a single permission to a role.
pub async fn grant_perm(pool: &SqlitePool, role: &str, perm: &str) -> AppResult<()> {
    sqlx::query("INSERT OR IGNORE INTO roles_perms (role, perm) VALUES (?, ?)")
        .bind(role)
        .bind(perm)
        .execute(pool)
        .await?;
    Ok(())
}

/// Verify a username/password pair against the stored PHC hash. Unknown user
/// and wrong password both come back as `false`; the caller does not learn
/// which.
pub async fn authenticate(pool: &SqlitePool, username: &str, password: &str) -> AppResult<bool> {
    let row: Option<(String,)> = sqlx::query_as(SELECT_PASSWORD_HASH)
        .bind(username)
        .fetch_optional(pool)
        .await?;
    match row {
        Some((phc,)) => Ok(verify_password(&phc, password)),
        None => Ok(false),
    }
}

/// Whether any of the user's roles grants `perm`.
pub async fn is_authorized(pool: &SqlitePool, username: &str, perm: &str) -> AppResult<bool> {
    let (count,): (i64,) = sqlx::query_as(SELECT_PERM_COUNT)
        .bind(username)
        .bind(perm)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Resolve the capability claims for a user. The three lookups are
/// independent; a failed lookup logs a warning and leaves that claim false
/// rather than failing the resolution.
pub async fn resolve_claims(pool: &SqlitePool, username: &str) -> Claims {
    let can_create = claim_lookup(pool, username, "create").await;
    let can_update = claim_lookup(pool, username, "update").await;
    let can_delete = claim_lookup(pool, username, "delete").await;
    Claims { can_create, can_update, can_delete }
}

async fn claim_lookup(pool: &SqlitePool, username: &str, perm: &str) -> bool {
    match is_authorized(pool, username, perm).await {
        Ok(granted) => granted,
        Err(e) => {
            warn!("claim lookup failed for user={} perm={}: {}", username, perm, e);
            false
        }
    }
}
