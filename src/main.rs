//! testnode-dispatch CLI
//!
//! Register nodes, inspect the registrar and dispatch jobs from the command
//! line. Uses the Postgres registrar queue when DATABASE_URL is set and an
//! in-memory queue otherwise (useful only within a single invocation).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use testnode_dispatch::checks::dispatch_check;
use testnode_dispatch::db::create_pool;
use testnode_dispatch::registrar::{handle_register, handle_report};
use testnode_dispatch::{
    CheckQueueMessage, DispatchOutcome, Dispatcher, DispatcherConfig, InMemoryQueueStore,
    NodeRegistry, PgQueueStore, PoolConfig, QueueStore, RegistryConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "testnode-dispatch")]
#[command(about = "Register CI test nodes and dispatch test jobs to them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a node from a JSON body (node_ip, node_name, node_sig_key, listen_port)
    Register {
        /// Registration body
        #[arg(short, long)]
        body: String,

        /// Value of the X-Forwarded-For header, if any
        #[arg(long)]
        forwarded_for: Option<String>,
    },

    /// Apply a node's own status report (e.g. busy=false) to its entry
    Report {
        /// Report body, same shape as a registration
        #[arg(short, long)]
        body: String,

        #[arg(long)]
        forwarded_for: Option<String>,
    },

    /// List active nodes
    List,

    /// Dispatch a raw JSON job
    Dispatch {
        /// Job body, e.g. {"commit_sha":"abc","check_run_id":"1"}
        #[arg(short, long)]
        job: String,
    },

    /// Dispatch the job behind a check-queue message and print the check-run patch
    DispatchCheck {
        /// Check-queue message JSON
        #[arg(short, long)]
        message: String,
    },
}

async fn queue_store() -> Result<Arc<dyn QueueStore>> {
    match std::env::var("DATABASE_URL") {
        Ok(_) => {
            let store = PgQueueStore::new(create_pool(&PoolConfig::from_env()?).await?);
            store.ensure_schema().await?;
            info!("Using Postgres registrar queue");
            Ok(Arc::new(store))
        }
        Err(_) => {
            warn!("DATABASE_URL not set, using an in-memory registrar queue");
            Ok(Arc::new(InMemoryQueueStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = NodeRegistry::new(queue_store().await?, RegistryConfig::from_env()?);

    match cli.command {
        Commands::Register { body, forwarded_for } => {
            let response = handle_register(&registry, &body, forwarded_for.as_deref()).await;
            println!("{} {}", response.status_code, response.body);
            if !response.is_success() {
                std::process::exit(1);
            }
        }

        Commands::Report { body, forwarded_for } => {
            let response = handle_report(&registry, &body, forwarded_for.as_deref()).await;
            println!("{} {}", response.status_code, response.body);
            if !response.is_success() {
                std::process::exit(1);
            }
        }

        Commands::List => {
            let entries = registry.list_active().await?;
            println!("=== Active Nodes ({}) ===", entries.len());
            for entry in &entries {
                println!(
                    "  - {} {}:{} [{}] expires {}",
                    entry.record.name,
                    entry.record.ip,
                    entry.record.port,
                    if entry.record.busy { "busy" } else { "idle" },
                    entry.expires_at.to_rfc3339()
                );
            }
        }

        Commands::Dispatch { job } => {
            let dispatcher = Dispatcher::with_http(registry, DispatcherConfig::from_env()?)?;
            match dispatcher.dispatch(&job).await? {
                DispatchOutcome::Accepted { node_name } => {
                    println!("Job accepted by node: {}", node_name);
                }
                DispatchOutcome::Rejected => {
                    println!("Job not accepted by any node");
                    std::process::exit(2);
                }
            }
        }

        Commands::DispatchCheck { message } => {
            let message = CheckQueueMessage::from_json(&message)?;
            let dispatcher = Dispatcher::with_http(registry, DispatcherConfig::from_env()?)?;
            let (outcome, update) = dispatch_check(&dispatcher, &message).await?;
            info!("Dispatch outcome: {:?}", outcome);
            println!("{}", serde_json::to_string_pretty(&update)?);
        }
    }

    Ok(())
}
