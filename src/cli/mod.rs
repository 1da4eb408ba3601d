//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command modules.

mod config_cmd;
mod crawl;
mod helpers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "film")]
#[command(about = "Movie metadata and review acquisition")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Never escalate to the browser
    #[arg(long, global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Search movies by keyword
    Search {
        keyword: String,
    },

    /// Fetch full metadata for one movie
    Detail {
        /// Douban subject id
        id: String,
    },

    /// Crawl short comments for one movie
    Comments {
        /// Douban subject id
        id: String,
        /// Comment pages to fetch (20 comments each)
        #[arg(short, long)]
        pages: Option<usize>,
    },

    /// Fetch a movie and its comments and save them to the local store
    Add {
        /// Douban subject id
        id: String,
        /// Comment pages to fetch (20 comments each)
        #[arg(short, long)]
        pages: Option<usize>,
    },

    /// Print the effective configuration
    Config,
}

/// Load config from an explicit path or by discovery.
async fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(&path)
                .await
                .map_err(|e| anyhow::anyhow!(e))
        }
        None => Ok(Config::load().await),
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config).await?;
    if cli.no_browser {
        config.browser.enabled = false;
    }

    match cli.command {
        Commands::Search { keyword } => crawl::cmd_search(&config, &keyword).await,
        Commands::Detail { id } => crawl::cmd_detail(&config, &id).await,
        Commands::Comments { id, pages } => crawl::cmd_comments(&config, &id, pages).await,
        Commands::Add { id, pages } => crawl::cmd_add(&config, &id, pages).await,
        Commands::Config => config_cmd::cmd_config_show(&config),
    }
}
