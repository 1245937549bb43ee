//! Couchlink command line tool
//!
//! Inspects and resolves document conflicts and manages replications of a
//! CouchDB-compatible store.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use couchlink::config::Config;

mod cli;

use cli::RootCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "couchlink=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let command = RootCommand::parse();

    let config = Config::from_env();
    tracing::debug!(url = %config.store.url, "Loaded configuration");

    command.run(config).await
}
