use anyhow::{Context, Result};
use clap::Parser;
use ringroute::config::Config;
use ringroute::ring::HashRing;
use ringroute::router_service::{self, RouterState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    let version = env!("CARGO_PKG_VERSION");
    info!(config = ?config, version = version, "Starting ringroute");

    let addr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_addr))?;

    let ring = HashRing::with_nodes(config.slots, config.nodes.clone());
    let state = RouterState::new(ring);

    router_service::serve(addr, state).await?;
    info!("router stopped");
    Ok(())
}
