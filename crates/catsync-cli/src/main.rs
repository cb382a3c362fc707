use std::process::ExitCode;

use anyhow::{Context, Result};
use catsync_core::SyncFlavor;
use catsync_storage::PgStore;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "catsync")]
#[command(about = "Synchronize the provider catalog into the local events and attractions tables")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync cycle and print the summary as JSON.
    Sync {
        #[arg(value_enum, default_value_t = Target::All)]
        target: Target,
    },
    /// Apply pending database migrations.
    Migrate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Target {
    Events,
    Attractions,
    All,
}

impl Target {
    fn flavors(self) -> &'static [SyncFlavor] {
        match self {
            Target::Events => &[SyncFlavor::Events],
            Target::Attractions => &[SyncFlavor::Attractions],
            Target::All => &[SyncFlavor::Events, SyncFlavor::Attractions],
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    // stdout carries the JSON summary
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,catsync_sync=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Sync { target: Target::All }) {
        Commands::Sync { target } => {
            let summaries = catsync_sync::run_flavors_from_env(target.flavors()).await;
            let rendered = match summaries.as_slice() {
                [single] => serde_json::to_string_pretty(single),
                many => serde_json::to_string_pretty(many),
            }
            .context("serializing run summary")?;
            println!("{rendered}");

            if summaries.iter().any(|s| s.outcome.is_failed()) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Migrate => {
            let database_url =
                std::env::var("DATABASE_URL").context("DATABASE_URL must be set to migrate")?;
            let store = PgStore::connect(&database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            tracing::info!("migrations applied");
        }
    }

    Ok(ExitCode::SUCCESS)
}
