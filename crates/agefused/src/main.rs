use anyhow::Result;
use tracing_subscriber::EnvFilter;

use agefused::config::Config;
use agefused::{engine, server};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("agefused starting");

    let config = Config::from_env();
    let engine = engine::spawn_engine(&config)?;

    server::run(&config, engine).await
}
