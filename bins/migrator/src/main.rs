//! Database migration runner for Tally.
//!
//! Reads the same configuration as the ledger (`config/default.toml`, the
//! `RUN_MODE` overlay and `TALLY__*` variables, with `.env` loaded first)
//! and applies the ledger and settlement schema to `database.url`.
//!
//! Usage:
//!   migrator up [--steps N]
//!   migrator down [--steps N]
//!   migrator status
//!   migrator fresh

use anyhow::Context;
use clap::{Parser, Subcommand};
use sea_orm_migration::MigratorTrait;
use tally_db::migration::Migrator;
use tally_shared::AppConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "migrator", about = "Applies the Tally schema", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations
    Up {
        /// Apply at most this many
        #[arg(long)]
        steps: Option<u32>,
    },
    /// Roll back applied migrations
    Down {
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// Show which migrations are applied
    Status,
    /// Drop every table and re-apply all migrations
    Fresh,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("migrator=info,tally_db=info,sea_orm_migration=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = AppConfig::load().context("loading configuration")?;
    let db = tally_db::connect(&config.database)
        .await
        .context("connecting to database")?;

    match cli.command {
        Command::Up { steps } => {
            Migrator::up(&db, steps).await?;
            info!(?steps, "migrations applied");
        }
        Command::Down { steps } => {
            Migrator::down(&db, Some(steps)).await?;
            info!(steps, "migrations rolled back");
        }
        Command::Status => Migrator::status(&db).await?,
        Command::Fresh => {
            Migrator::fresh(&db).await?;
            info!("schema recreated");
        }
    }
    Ok(())
}
