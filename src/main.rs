// Jobgate - Main Entry Point
//
// CLI for the job pipeline:
// - HTTP front (serve)
// - One-shot job submission and status queries
// - Manual subscription grants and database setup

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobgate::billing::{Billing, CompletedPayment};
use jobgate::config::{Config, LogLevel};
use jobgate::pipeline::{CommandFetcher, JobPipeline, OutboxDelivery, PipelineSettings};
use jobgate::server::{self, AppState};
use jobgate::store::{EntityId, SqliteLedger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Jobgate: quota-aware per-entity job runner
#[derive(Parser, Debug)]
#[command(name = "jobgate")]
#[command(author = "Jobgate Contributors")]
#[command(version)]
#[command(about = "Quota-aware per-entity job admission and execution", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (default: ~/.config/jobgate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP front
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one job and print its outcome
    Submit {
        entity_id: EntityId,
        /// Message containing the resource link
        text: String,
    },
    /// Show plan and remaining allowance
    Status { entity_id: EntityId },
    /// Grant a premium subscription for a completed payment
    Subscribe {
        entity_id: EntityId,
        #[arg(long)]
        payment_ref: String,
        /// Amount paid (defaults to the configured price)
        #[arg(long)]
        amount: Option<i64>,
    },
    /// Create the database and schema
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let mut logging = config.logging.clone();
    if args.verbose {
        logging.level = LogLevel::Debug;
    }
    logging.init()?;

    match args.command {
        Some(Commands::Serve { bind }) => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let (pipeline, billing) = build(&config).await?;
            info!("Jobgate v{} starting", env!("CARGO_PKG_VERSION"));
            server::serve(&bind, AppState::new(pipeline, billing)).await?;
        }
        Some(Commands::Submit { entity_id, text }) => {
            let (pipeline, _) = build(&config).await?;
            let outcome = pipeline.submit(entity_id, &text).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            println!("{}", outcome.user_message());
            if !outcome.is_delivered() {
                std::process::exit(1);
            }
        }
        Some(Commands::Status { entity_id }) => {
            let (pipeline, _) = build(&config).await?;
            let status = pipeline
                .status(entity_id)
                .await
                .context("Failed to read entity status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Some(Commands::Subscribe {
            entity_id,
            payment_ref,
            amount,
        }) => {
            let (_, billing) = build(&config).await?;
            let subscription = billing
                .complete(&CompletedPayment {
                    entity_id,
                    payment_ref,
                    amount: amount.unwrap_or(config.quota.premium_price),
                })
                .await
                .context("Failed to create subscription")?;
            println!("{}", serde_json::to_string_pretty(&subscription)?);
        }
        Some(Commands::InitDb) => {
            open_ledger(&config).await?;
            println!("Database ready at {}", config.storage.database_url);
        }
        None => {
            println!("No command specified. Use \"jobgate --help\" for usage.");
        }
    }

    Ok(())
}

async fn open_ledger(config: &Config) -> Result<SqliteLedger> {
    SqliteLedger::connect(&config.storage.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.storage.database_url))
}

async fn build(config: &Config) -> Result<(Arc<JobPipeline>, Billing)> {
    let ledger = open_ledger(config).await?;
    let pipeline = Arc::new(JobPipeline::new(
        PipelineSettings::from_config(config),
        Arc::new(ledger),
        Arc::new(CommandFetcher::new(&config.fetch)),
        Arc::new(OutboxDelivery::new(&config.delivery.outbox_dir)),
    ));
    let billing = Billing::new(pipeline.tiers().clone(), config.quota.clone());
    Ok((pipeline, billing))
}
