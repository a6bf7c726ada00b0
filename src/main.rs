//! # stac-search CLI
//!
//! Natural-language search over STAC catalogs, from the terminal or as an
//! HTTP service.
//!
//! ## Usage
//!
//! ```bash
//! stac-search [--config ./stac-search.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `stac-search serve` | Start the HTTP search API |
//! | `stac-search collections "<query>"` | Rank collections for a query |
//! | `stac-search items "<query>"` | Run a full item search |
//! | `stac-search index <url>` | Index a catalog's collections |
//! | `stac-search indexes` | List indexed catalogs |
//!
//! ## Examples
//!
//! ```bash
//! # Which collections hold aerial imagery?
//! stac-search collections "NAIP aerial imagery"
//!
//! # Search parameters only, no item search
//! stac-search items "Sentinel-2 over Paris in summer 2023 with <10% clouds" --params-only
//!
//! # Rebuild the index of another catalog
//! stac-search index https://earth-search.aws.element84.com/v1 --reload
//! ```
//!
//! Output is pretty-printed JSON on stdout; logs go to stderr and are
//! filtered by `LOG_LEVEL` or `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use stac_search::catalog_index::CatalogIndex;
use stac_search::config::{self, Config};
use stac_search::models::Query;
use stac_search::orchestrator::SearchOrchestrator;
use stac_search::server;
use stac_search::store::{IndexStore, SqliteIndexStore};

/// Natural-language search over STAC catalogs.
#[derive(Parser)]
#[command(name = "stac-search", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Without it, built-in defaults plus environment overrides are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP search API on `[server].bind`.
    Serve,

    /// Rank the collections of a catalog for a query.
    Collections {
        query: String,

        /// Catalog URL (defaults to `[catalog].default_url`).
        #[arg(long)]
        catalog: Option<String>,
    },

    /// Search a catalog for items matching a query.
    Items {
        query: String,

        /// Catalog URL (defaults to `[catalog].default_url`).
        #[arg(long)]
        catalog: Option<String>,

        /// Print the STAC search parameters without running the search.
        #[arg(long)]
        params_only: bool,

        /// Maximum number of items to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Build the collection index for a catalog.
    Index {
        url: String,

        /// Drop and rebuild an existing index.
        #[arg(long)]
        reload: bool,
    },

    /// List indexed catalogs.
    Indexes,
}

fn init_tracing() {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => config::default_config(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = load(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve => {
            let orchestrator = Arc::new(SearchOrchestrator::from_config(&cfg).await?);
            server::run_server(&cfg, orchestrator).await?;
        }
        Commands::Collections { query, catalog } => {
            let orchestrator = SearchOrchestrator::from_config(&cfg).await?;
            let results = orchestrator
                .search_collections(&query, catalog.as_deref())
                .await?;
            print_json(&results)?;
        }
        Commands::Items {
            query,
            catalog,
            params_only,
            limit,
        } => {
            let query = Query {
                text: query,
                catalog_url: catalog,
                limit,
                return_params_only: params_only,
            };
            let orchestrator = SearchOrchestrator::from_config(&cfg).await?;
            let result = orchestrator.search(&query).await?;
            print_json(&result)?;
        }
        // Index maintenance needs no LLM.
        Commands::Index { url, reload } => {
            let index = CatalogIndex::from_config(&cfg).await?;
            let status = if reload {
                index.reload(&url).await
            } else {
                index.ensure_indexed(&url).await
            };
            print_json(&status)?;
            if !status.success {
                anyhow::bail!(
                    "indexing failed: {}",
                    status.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Indexes => {
            let store = SqliteIndexStore::open(&cfg.index.path).await?;
            print_json(&store.list_namespaces().await?)?;
        }
    }

    Ok(())
}
