//! # lumen CLI
//!
//! Command-line interface for the Lumen owner-free block store.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use lumen_block::{BlockHash, StorageContract};
use lumen_cache::{BlockCacheManager, DiskBlockStore, KvBlockStore, MemoryBlockStore};
use lumen_chain::{BlockParams, ChainAssembler, OwnershipToken};
use lumen_config::logging::{init_logging, LogLevel};
use lumen_config::{log_cli_debug, log_cli_info};

/// Lumen - owner-free content-addressable block store
#[derive(Parser)]
#[command(name = "lumen")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Storage root directory (overrides config)
    #[arg(long = "base-path")]
    base_path: Option<PathBuf>,

    /// Database name (overrides config)
    #[arg(long = "database")]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config to .lumen/config.toml
    Init,

    /// Split a file into brightened blocks and store its chain
    Ingest {
        /// File to ingest
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Block size name (micro, message, tiny, small, medium, large)
        #[arg(short, long)]
        block_size: Option<String>,

        /// Retention in days for the storage contract
        #[arg(long)]
        retention_days: Option<i64>,
    },

    /// Restore a file from its first constituent block list
    Restore {
        /// Hex id of the chain's first constituent block list
        #[arg(value_name = "CBL-HASH")]
        cbl: String,

        /// Destination path (defaults to a fresh temp file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show a stored block's metadata
    Get {
        #[arg(value_name = "HASH")]
        hash: String,
    },

    /// Drop a block, subject to the ownership gate
    Drop {
        #[arg(value_name = "HASH")]
        hash: String,

        /// Requester GUID; defaults to this store's own instance id
        #[arg(long)]
        token: Option<Uuid>,
    },

    /// Show store configuration and identity
    Status,
}

fn open_store(cli: &Cli) -> Result<Arc<dyn BlockCacheManager>> {
    let config = lumen_config::config();

    let mut storage = config.storage.clone();
    if let Some(base) = &cli.base_path {
        storage.base_path = Some(base.clone());
    }
    if let Some(db) = &cli.database {
        storage.database_name = Some(db.clone());
    }

    match storage.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryBlockStore::new())),
        "disk" => {
            let (base, database) = storage.resolved()?;
            Ok(Arc::new(DiskBlockStore::open(base, &database)?))
        }
        "kv" => {
            let (base, database) = storage.resolved()?;
            Ok(Arc::new(KvBlockStore::open(base.join(database))?))
        }
        other => bail!("unknown storage backend {other:?}"),
    }
}

fn parse_hash(hex: &str) -> Result<BlockHash> {
    BlockHash::from_hex(hex).with_context(|| format!("invalid block hash {hex:?}"))
}

fn main() -> Result<()> {
    init_logging(LogLevel::Warn);

    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        fs::create_dir_all(".lumen")?;
        let path = PathBuf::from(".lumen/config.toml");
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        fs::write(&path, lumen_config::Config::default_toml())?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let store = open_store(&cli)?;
    let assembler = ChainAssembler::new(store.clone());

    match cli.command {
        Commands::Init => unreachable!("handled before store setup"),

        Commands::Ingest {
            file,
            block_size,
            retention_days,
        } => {
            let config = lumen_config::config();
            let size = match block_size {
                Some(name) => {
                    let mut ingest = config.ingest.clone();
                    ingest.block_size = name;
                    ingest.parsed_block_size()?
                }
                None => config.ingest.parsed_block_size()?,
            };
            let retention = retention_days.unwrap_or(config.ingest.retention_days);
            drop(config);

            let params = BlockParams {
                block_size: size,
                contract: StorageContract::new(Duration::days(retention)),
            };
            log_cli_debug!("Ingesting", file = file.display().to_string());
            let chain = assembler
                .make_cbl_or_super_cbl_from_file(&file, &params)
                .with_context(|| format!("failed to ingest {}", file.display()))?;

            log_cli_info!("Ingest complete", lists = chain.cbls.len());
            println!("Source id:    {}", chain.source_id.to_hex());
            println!("Chain lists:  {}", chain.cbls.len());
            println!("First list:   {}", chain.cbls[0].id());
            if let Some(sup) = &chain.super_cbl {
                println!("Super list:   {}", sup.id());
            }
            println!("Bright handle: {}", chain.handle.brightened_cbl_hash);
            Ok(())
        }

        Commands::Restore { cbl, output } => {
            let hash = parse_hash(&cbl)?;
            let block = assembler.find_block_by_id(&hash)?;
            let info = assembler.restore_file(&block)?;

            let path = match output {
                Some(dest) => {
                    // Rename can fail across filesystems; fall back to copy.
                    if fs::rename(&info.path, &dest).is_err() {
                        fs::copy(&info.path, &dest)?;
                        fs::remove_file(&info.path)?;
                    }
                    dest
                }
                None => info.path,
            };
            println!("Restored {} bytes to {}", info.verified_hash.length(), path.display());
            println!("Verified digest: {}", info.verified_hash.to_hex());
            Ok(())
        }

        Commands::Get { hash } => {
            let block = assembler.find_block_by_id(&parse_hash(&hash)?)?;
            let contract = block.contract();
            println!("Id:        {}", block.id());
            println!("Type:      {:?}", block.block_type());
            println!("Size:      {:?}", block.block_size());
            println!("Keep until: {}", contract.keep_until);
            println!(
                "Expired:   {}",
                if contract.is_expired(Utc::now()) { "yes" } else { "no" }
            );
            Ok(())
        }

        Commands::Drop { hash, token } => {
            let hash = parse_hash(&hash)?;
            let token = OwnershipToken(token.unwrap_or_else(|| store.instance_id()));
            let removed = assembler.drop_block_by_id(&hash, &token)?;
            println!("{}", if removed { "Dropped" } else { "Not present" });
            Ok(())
        }

        Commands::Status => {
            let config = lumen_config::config();
            println!("Backend:     {}", config.storage.backend);
            match &config.storage.base_path {
                Some(p) => println!("Base path:   {}", p.display()),
                None => println!("Base path:   (unset)"),
            }
            println!("Instance id: {}", store.instance_id());
            Ok(())
        }
    }
}
