use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use hrdesk::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = AppConfig::from_env_and_args(&args);

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "hrdesk",
        "hrdesk starting: RUST_LOG='{}', http_port={}, backend={}, seed={:?}, secure_cookie={}",
        rust_log,
        cfg.http_port,
        cfg.backend_url.as_deref().unwrap_or("<in-process>"),
        cfg.seed_file,
        cfg.secure_cookie
    );

    hrdesk::server::run(cfg).await
}
