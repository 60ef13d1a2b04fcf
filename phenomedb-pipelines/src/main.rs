//! PhenomeDB pipeline manager CLI

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Commands, handle_command};
use phenomedb_core::domain::env::DbEnv;
use phenomedb_pipelines::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "phenomedb-pipelines")]
#[command(about = "PhenomeDB pipeline manager", long_about = None)]
struct Cli {
    /// Database environment (PROD, BETA or TEST)
    #[arg(long, global = true, env = "PHENOMEDB_DB_ENV", default_value = "PROD")]
    db_env: DbEnv,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phenomedb_pipelines=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;

    handle_command(cli.command, cli.db_env, &config).await
}
