//! toolcrib - Tool Custody Engine
//!
//! Station-side command line for vision-checked tool checkout and checkin.
//!
//! # Usage
//!
//! ```bash
//! # Seed users, roles and tool sets
//! toolcrib import-catalog --file catalog.toml
//!
//! # Photograph a tool set: routes to checkout or checkin automatically
//! toolcrib check --employee E-1001 --photo tray.jpg
//!
//! # QA: list escalated transactions and resolve one
//! toolcrib qa-list --status qa
//! toolcrib verify --transaction 42 --qa-employee Q-7 --reason MODEL_ERR --notes "glare"
//! ```
//!
//! # Environment Variables
//!
//! - `TOOLCRIB_CONFIG`: Path to the TOML config (default: ./toolcrib.toml)
//! - `RUST_LOG`: Logging level (default: info)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use toolcrib::config::{self, CustodyConfig};
use toolcrib::storage::{CatalogImport, CatalogSeed};
use toolcrib::{
    CustodyService, CustodySettings, FsImageStore, HttpRecognitionClient, Repositories,
    RequestContext, SledStore, TransactionStatus,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "toolcrib")]
#[command(about = "Tool custody engine for maintenance tool sets")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides TOOLCRIB_CONFIG and ./toolcrib.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the database directory from the config
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Check in if the engineer holds tools, otherwise check out
    Check {
        #[arg(long)]
        employee: String,
        #[arg(long)]
        photo: PathBuf,
        /// Tool set to check out (default: the engineer's own set)
        #[arg(long)]
        tool_set: Option<u64>,
    },

    /// Check a tool set out
    Checkout {
        #[arg(long)]
        employee: String,
        #[arg(long)]
        photo: PathBuf,
        #[arg(long)]
        tool_set: Option<u64>,
    },

    /// Return the engineer's tool set
    Checkin {
        #[arg(long)]
        employee: String,
        #[arg(long)]
        photo: PathBuf,
    },

    /// Resolve a transaction awaiting QA
    Verify {
        #[arg(long)]
        transaction: u64,
        /// Employee id of the Quality Auditor
        #[arg(long)]
        qa_employee: String,
        /// MODEL_ERR or HUMAN_ERR
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "")]
        notes: String,
        /// Tool type ids QA flagged; pass the flag with no value to record "none"
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        tool_ids: Option<Vec<u64>>,
    },

    /// List transactions, newest first
    QaList {
        /// OPEN, QA, CLOSED or FAILED
        #[arg(long)]
        status: Option<TransactionStatus>,
    },

    /// Show the QA review screen for one transaction
    QaShow {
        #[arg(long)]
        transaction: u64,
    },

    /// Load roles, users, tool types and tool sets from a TOML or JSON seed
    ImportCatalog {
        #[arg(long)]
        file: PathBuf,
    },
}

// ============================================================================
// Wiring
// ============================================================================

fn load_config(path: Option<&Path>) -> Result<CustodyConfig> {
    match path {
        Some(p) => CustodyConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config {}", p.display())),
        None => Ok(CustodyConfig::load()),
    }
}

fn open_store(cfg: &CustodyConfig, db_override: Option<PathBuf>) -> Result<Arc<SledStore>> {
    let path = db_override.unwrap_or_else(|| cfg.storage.db_path.clone());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SledStore::open(&path)
        .with_context(|| format!("Failed to open custody store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_service(cfg: &CustodyConfig, store: Arc<SledStore>) -> Result<CustodyService> {
    let recognition = HttpRecognitionClient::new(
        &cfg.recognition.base_url,
        cfg.recognition.timeout(),
        cfg.recognition.class_id_offset,
        cfg.recognition.confidence_scale,
    )
    .context("Failed to build recognition client")?;
    let images = FsImageStore::new(&cfg.storage.image_root, &cfg.storage.public_base_url);

    Ok(CustodyService::new(
        Repositories::from_store(store),
        Arc::new(recognition),
        Arc::new(images),
        CustodySettings::from(cfg),
    ))
}

async fn read_photo(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read photo {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Request context cancelled on Ctrl+C.
fn request_context() -> RequestContext {
    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, cancelling request");
        shutdown.cancel();
    });
    RequestContext::with_cancellation(token)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    let cfg = load_config(args.config.as_deref())?;
    config::init(cfg);
    let cfg = config::get();
    let store = open_store(cfg, args.db)?;

    match args.command {
        SubCommand::ImportCatalog { file } => {
            let seed = CatalogSeed::load(&file)
                .with_context(|| format!("Failed to load catalog {}", file.display()))?;
            let stats = store.import_catalog(&seed).context("Catalog import failed")?;
            print_json(&stats)?;
        }
        SubCommand::Check {
            employee,
            photo,
            tool_set,
        } => {
            let service = build_service(cfg, store.clone())?;
            let photo = read_photo(&photo).await?;
            let response = service
                .check(&request_context(), &employee, &photo, tool_set)
                .await
                .context("Check failed")?;
            print_json(&response)?;
        }
        SubCommand::Checkout {
            employee,
            photo,
            tool_set,
        } => {
            let service = build_service(cfg, store.clone())?;
            let photo = read_photo(&photo).await?;
            let response = service
                .checkout(&request_context(), &employee, &photo, tool_set)
                .await
                .context("Checkout failed")?;
            print_json(&response)?;
        }
        SubCommand::Checkin { employee, photo } => {
            let service = build_service(cfg, store.clone())?;
            let photo = read_photo(&photo).await?;
            let response = service
                .checkin(&request_context(), &employee, &photo)
                .await
                .context("Checkin failed")?;
            print_json(&response)?;
        }
        SubCommand::Verify {
            transaction,
            qa_employee,
            reason,
            notes,
            tool_ids,
        } => {
            let service = build_service(cfg, store.clone())?;
            let response = service
                .verify(&request_context(), transaction, &qa_employee, &reason, &notes, tool_ids)
                .await
                .context("Verification failed")?;
            print_json(&response)?;
        }
        SubCommand::QaList { status } => {
            let service = build_service(cfg, store.clone())?;
            let rows = service
                .list_transactions(status)
                .await
                .context("Listing transactions failed")?;
            print_json(&rows)?;
        }
        SubCommand::QaShow { transaction } => {
            let service = build_service(cfg, store.clone())?;
            let view = service
                .qa_transaction(transaction)
                .await
                .context("Loading transaction failed")?;
            print_json(&view)?;
        }
    }

    store.flush().context("Failed to flush custody store")?;
    Ok(())
}
