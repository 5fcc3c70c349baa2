//! Allowlist operator tool
//!
//! Imports allowlist rows, rebuilds commitments and answers membership
//! questions against a SQLite database.
//!
//! Usage:
//!     allowlist import rows.json
//!     allowlist rebuild 1 --sources partner,airdrop
//!     allowlist proof 0xabc... 1

use std::path::PathBuf;

use allowlist::config::parse_chunk_size;
use allowlist::{open_sqlite, AllowlistConfig, SqliteService};
use allowlist_core::merkle::to_hex;
use allowlist_core::{SourceFilter, TokenId};
use clap::{Parser, Subcommand};
use tracing::info;

const DEFAULT_DATABASE: &str = "allowlist.db";

#[derive(Parser, Debug)]
#[command(name = "allowlist")]
#[command(about = "Allowlist Merkle commitment tool")]
#[command(version)]
struct Args {
    /// SQLite database file (default: $ALLOWLIST_DATABASE or allowlist.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Comma separated allowed sources (overrides $WHITELIST_SOURCES)
    #[arg(long, global = true)]
    sources: Option<String>,

    /// Entries per store write (overrides $ALLOWLIST_CHUNK_SIZE)
    #[arg(long, global = true)]
    chunk_size: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a JSON array of {address, token_ids, source?, note?} rows
    Import {
        file: PathBuf,
    },
    /// Rebuild the commitment for a token id and record its root
    Rebuild {
        #[arg(default_value_t = 1)]
        token_id: TokenId,
    },
    /// Print the current root for a token id
    Root {
        #[arg(default_value_t = 1)]
        token_id: TokenId,
    },
    /// Check whether an address is eligible for a token id
    Check {
        address: String,
        #[arg(default_value_t = 1)]
        token_id: TokenId,
    },
    /// Print a Merkle proof as JSON
    Proof {
        address: String,
        #[arg(default_value_t = 1)]
        token_id: TokenId,
    },
    /// Delete an address from the allowlist
    Remove {
        address: String,
    },
}

fn load_config(args: &Args) -> allowlist::Result<AllowlistConfig> {
    let mut config = AllowlistConfig::from_env()?;

    let database = args
        .database
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
    config = config.with_database_path(database);

    if let Some(sources) = &args.sources {
        config = config.with_allowed_sources(SourceFilter::parse_list(sources));
    }
    if let Some(raw) = &args.chunk_size {
        config = config.with_chunk_size(parse_chunk_size(raw)?);
    }

    Ok(config)
}

fn print_root(token_id: TokenId, root: Option<allowlist_core::Hash>) {
    match root {
        Some(root) => println!("{}", to_hex(&root)),
        None => println!("no entries for token id {}", token_id),
    }
}

async fn run(service: &SqliteService, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Import { file } => {
            let report = service.ingest_file(&file).await?;
            println!(
                "rows: {}, accepted: {}, rejected: {}, addresses: {} (created {}, updated {}, unchanged {})",
                report.rows,
                report.accepted,
                report.rejected_count(),
                report.unique_addresses,
                report.created,
                report.updated,
                report.unchanged,
            );
            for rejected in &report.rejected {
                println!("  row {}: {}", rejected.index, rejected.reason);
            }
        }
        Command::Rebuild { token_id } => {
            print_root(token_id, service.rebuild(token_id).await?);
        }
        Command::Root { token_id } => {
            print_root(token_id, service.get_root(token_id).await?);
        }
        Command::Check { address, token_id } => {
            let eligible = service.is_eligible(&address, token_id).await?;
            println!("{}", eligible);
        }
        Command::Proof { address, token_id } => match service.get_proof(&address, token_id).await? {
            Some(proof) => println!("{}", serde_json::to_string_pretty(&proof)?),
            None => println!("null"),
        },
        Command::Remove { address } => {
            let removed = service.remove(&address).await?;
            println!("{}", if removed { "removed" } else { "not found" });
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    allowlist::tracing::init_with_filter(&args.log_level);

    let config = load_config(&args)?;
    info!(
        database = ?config.database_path,
        sources = ?config.allowed_sources,
        chunk_size = config.chunk_size,
        "opening allowlist"
    );

    let service = open_sqlite(config)?;
    run(&service, args.command).await
}
