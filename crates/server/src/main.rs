// primal-server: live streaming platform backend, standalone entry point.

use anyhow::Context;
use primal_server::config::ServerConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter.clone())),
        )
        .init();

    info!("starting primal live backend");
    primal_server::runtime::run(config).await.context("server terminated unexpectedly")
}
