use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use satchel::cli::Cli;
use satchel::config::Config;
use satchel::session::SqliteKvStore;
use satchel::ClientContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Ensure data directory exists
    std::fs::create_dir_all(&config.storage.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.storage.data_dir.display()
        )
    })?;

    // Initialize session storage
    let store = SqliteKvStore::init(&config.storage.data_dir).await?;

    let context = ClientContext::new(config, Arc::new(store))?;

    satchel::cli::execute(cli.command, &context).await
}
