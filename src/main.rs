//! nvremoted - relay server for the NVDA Remote protocol.

use nvremoted::config::Config;
use nvremoted::network::Gateway;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "nvremoted.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        address = %config.listen.address,
        tls_enabled = config.tls.is_some(),
        "Starting nvremoted"
    );

    let gateway = Gateway::bind(&config).await?;
    gateway.run().await
}
