use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let config = mdwiki::config::Config::from_env();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "mdwiki",
        "mdwiki starting: RUST_LOG='{}', http_port={}, db_url='{}', pool_size={}, session_ttl_secs={}",
        rust_log, config.http_port, config.db_url, config.db_max_pool_size, config.session_ttl_secs
    );

    mdwiki::server::run(config).await
}
