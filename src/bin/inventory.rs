//! Inventory CLI
//!
//! Operator surface for the inventory pipeline: run crawls, inspect and
//! purge snapshots, and manage models built from them.
//!
//! Usage:
//!   inventory crawl --root organization/123
//!   inventory purge --older-than-days 30
//!   inventory index list
//!   inventory model create m1 --index 5
//!   inventory model use m1
//!   inventory query m1 --prefix organization/123/project/p1

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};

use cloud_inventory::{
    AppConfig, CancelHandle, InventoryService, InventoryStorage, RestApiClient,
};

#[derive(Parser, Debug)]
#[command(name = "inventory")]
#[command(about = "Crawl cloud resource hierarchies into queryable models")]
struct Args {
    /// Path to a YAML config file (falls back to INVENTORY_CONFIG, then defaults)
    #[arg(long, short = 'c', global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the hierarchy into a new inventory snapshot
    Crawl {
        /// Crawl roots as type/key references; defaults to the configured roots
        #[arg(long = "root")]
        roots: Vec<String>,
    },
    /// Delete completed snapshots older than the retention window
    Purge {
        /// Retention window in days; 0 purges every completed snapshot
        #[arg(long, default_value_t = 0)]
        older_than_days: i64,
    },
    /// Inspect inventory snapshots
    Index {
        #[command(subcommand)]
        command: IndexCommand,
    },
    /// Manage models built from snapshots
    Model {
        #[command(subcommand)]
        command: ModelCommand,
    },
    /// Query a model's rows
    Query {
        /// Model name
        model: String,
        /// Subtree prefix, e.g. organization/123/project/p1
        #[arg(long)]
        prefix: Option<String>,
        /// Resource type filter
        #[arg(long = "type")]
        type_name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum IndexCommand {
    /// List all snapshots with status and counters
    List,
}

#[derive(Subcommand, Debug)]
enum ModelCommand {
    /// Build a new model from a completed snapshot
    Create {
        name: String,
        #[arg(long)]
        index: i64,
    },
    /// Select the active model
    Use { name: String },
    /// Delete a model and all of its rows
    Delete { name: String },
    /// List models
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = AppConfig::resolve(args.config.as_deref())?;

    let storage = InventoryStorage::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    let api = RestApiClient::new(&config.api_base_url)
        .with_context(|| format!("invalid API base URL {}", config.api_base_url))?;
    let service = InventoryService::new(storage, Arc::new(api), config.max_workers)?;

    match args.command {
        Command::Crawl { roots } => {
            let roots = if roots.is_empty() {
                config.roots.clone()
            } else {
                roots
            };
            if roots.is_empty() {
                bail!("no crawl roots given; pass --root or configure `roots`");
            }

            let cancel = CancelHandle::new();
            let handle = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("cancelling crawl...");
                    handle.cancel();
                }
            });

            let report = service.crawl(&roots, &cancel).await?;
            println!(
                "index {} finished with status {}: {} resources, {} errors",
                report.index_id, report.status, report.stats.stored, report.stats.errors
            );
        }
        Command::Purge { older_than_days } => {
            let cutoff = Utc::now() - Duration::days(older_than_days);
            let purged = service.purge(cutoff).await?;
            println!("purged {purged} snapshots");
        }
        Command::Index {
            command: IndexCommand::List,
        } => {
            for index in service.list_indexes().await? {
                let completed = index
                    .completed_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>6}  {:<16}  started {}  completed {}  {} resources, {} errors",
                    index.id,
                    index.status,
                    index.started_at.to_rfc3339(),
                    completed,
                    index.resource_count,
                    index.error_count
                );
            }
        }
        Command::Model { command } => match command {
            ModelCommand::Create { name, index } => {
                let model_id = service.create_model(&name, index).await?;
                let rows = service.model_row_count(&name).await?;
                println!("created model '{name}' ({model_id}) with {rows} rows");
            }
            ModelCommand::Use { name } => {
                service.use_model(&name).await?;
                println!("active model is now '{name}'");
            }
            ModelCommand::Delete { name } => {
                service.delete_model(&name).await?;
                println!("deleted model '{name}'");
            }
            ModelCommand::List => {
                let active = service.active_model().await;
                for model in service.list_models().await? {
                    let marker = if active.as_deref() == Some(model.name.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        "{} {:<24} index {}  created {}  {}",
                        marker,
                        model.name,
                        model.index_id,
                        model.created_at.to_rfc3339(),
                        model.status
                    );
                }
            }
        },
        Command::Query {
            model,
            prefix,
            type_name,
        } => {
            let rows = match (prefix, type_name) {
                (Some(prefix), None) => service.query_by_prefix(&model, &prefix).await?,
                (None, Some(type_name)) => service.query_by_type(&model, &type_name).await?,
                _ => bail!("pass exactly one of --prefix or --type"),
            };
            for row in rows {
                println!("{:<16} {}", row.type_name, row.full_name);
            }
        }
    }

    Ok(())
}
