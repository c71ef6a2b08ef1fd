use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use steward_client::CalendarClient;
use steward_engine::{SyncConfig, SyncEngine};
use steward_store::SqliteStore;
use steward_web::AppState;
use tracing_subscriber::EnvFilter;

const DEFAULT_DATABASE_URL: &str = "sqlite://steward.db";

#[derive(Debug, Parser)]
#[command(name = "steward")]
#[command(about = "Calendar sync and event coordination")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation pass against the upstream calendar.
    Sync {
        /// Look-ahead window in days.
        #[arg(long, default_value_t = 90)]
        days_ahead: i64,
    },
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Apply pending database migrations and exit.
    Migrate,
    /// Print local sync state.
    Status,
}

fn database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { days_ahead: 90 }) {
        Commands::Sync { days_ahead } => {
            let client = CalendarClient::from_env()?;
            let store = SqliteStore::connect(&database_url()).await?;
            let config = SyncConfig {
                days_ahead,
                ..SyncConfig::default()
            };
            let result = SyncEngine::new(client, store, config).run().await;
            println!(
                "sync complete: run_id={} created={} updated={} deleted={} total={} errors={}",
                result.run_id,
                result.created,
                result.updated,
                result.deleted,
                result.total,
                result.errors.len()
            );
            for error in &result.errors {
                eprintln!("  {error}");
            }
            if !result.ok() {
                std::process::exit(1);
            }
        }
        Commands::Serve { port } => {
            let client = CalendarClient::from_env()?;
            let store = SqliteStore::connect(&database_url()).await?;
            let state = AppState::new(store, Arc::new(client));
            steward_web::serve(state, port).await?;
        }
        Commands::Migrate => {
            // Connecting runs the embedded migrations.
            SqliteStore::connect(&database_url()).await?;
            println!("migrations applied");
        }
        Commands::Status => {
            let store = SqliteStore::connect(&database_url()).await?;
            let status = store.sync_status().await?;
            println!(
                "events={} last_sync_at={}",
                status.total_events,
                status.last_sync_at.as_deref().unwrap_or("never")
            );
        }
    }

    Ok(())
}
