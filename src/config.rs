//! Environment-derived configuration with documented defaults.
//! All knobs are named options; none of them carry business logic.

/// Runtime configuration for the wiki server.
///
/// Every field has an environment override and a default suitable for local
/// development:
/// - `MDWIKI_HTTP_PORT` (default 8080)
/// - `MDWIKI_DB_URL` (default `sqlite:db/wiki.db`)
/// - `MDWIKI_DB_MAX_POOL_SIZE` (default 30)
/// - `MDWIKI_JWT_SECRET` (default is a dev-only secret; set in production)
/// - `MDWIKI_JWT_TTL_SECS` (default 3600)
/// - `MDWIKI_SESSION_TTL_SECS` (default 3600)
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub db_url: String,
    pub db_max_pool_size: u32,
    pub jwt_secret: String,
    pub jwt_ttl_secs: u64,
    pub session_ttl_secs: u64,
}

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_DB_URL: &str = "sqlite:db/wiki.db";
const DEFAULT_DB_MAX_POOL_SIZE: u32 = 30;
const DEFAULT_JWT_SECRET: &str = "secret321jwt";
const DEFAULT_JWT_TTL_SECS: u64 = 3600;
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            db_url: DEFAULT_DB_URL.to_string(),
            db_max_pool_size: DEFAULT_DB_MAX_POOL_SIZE,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_ttl_secs: DEFAULT_JWT_TTL_SECS,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            http_port: env_or("MDWIKI_HTTP_PORT", DEFAULT_HTTP_PORT),
            db_url: env_or("MDWIKI_DB_URL", DEFAULT_DB_URL.to_string()),
            db_max_pool_size: env_or("MDWIKI_DB_MAX_POOL_SIZE", DEFAULT_DB_MAX_POOL_SIZE),
            jwt_secret: env_or("MDWIKI_JWT_SECRET", DEFAULT_JWT_SECRET.to_string()),
            jwt_ttl_secs: env_or("MDWIKI_JWT_TTL_SECS", DEFAULT_JWT_TTL_SECS),
            session_ttl_secs: env_or("MDWIKI_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS),
        }
    }
}
