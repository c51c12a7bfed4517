//! Satchel CLI: cache, store and fetch files through the configured backend.
//!
//! Settings come from the environment (`SATCHEL_ROOT`, `SATCHEL_BASE_PATH`,
//! `SATCHEL_STORAGE`); a `.env` file is loaded when present.

use anyhow::Context;
use clap::{Parser, Subcommand};
use satchel_cli::{config_snapshot, init_tracing, uploader_scope};
use satchel_core::{SanitizedFile, Settings};
use satchel_uploader::{clean_cached_files, Uploader};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "satchel", about = "File attachment cache and storage pipeline")]
struct Cli {
    /// Storage engine to use instead of SATCHEL_STORAGE
    #[arg(long, global = true)]
    storage: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cache a local file and store it
    Store {
        /// Path to the file to store
        file: PathBuf,
    },
    /// Cache a local file without storing it
    Cache {
        /// Path to the file to cache
        file: PathBuf,
    },
    /// Download a file from an http(s) URL into the cache
    Download {
        /// URL of the file
        url: String,
        /// Store the downloaded file as well
        #[arg(long)]
        store: bool,
    },
    /// Show a stored file
    Retrieve {
        /// Identifier returned by `store`
        identifier: String,
    },
    /// Delete a stored file
    Delete {
        /// Identifier returned by `store`
        identifier: String,
    },
    /// Remove stale cache directories
    CleanCache {
        /// Minimum age of the directories to remove
        #[arg(long, default_value = "86400")]
        older_than_secs: u64,
    },
    /// Print the resolved configuration
    Config,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("Failed to load settings")?;
    tracing::debug!(root = %settings.root.display(), storage = ?settings.storage, "Settings loaded");
    let scope = uploader_scope(&settings, cli.storage.as_deref())?;

    match cli.command {
        Commands::Store { file } => {
            let mut uploader = Uploader::new(scope)?;
            uploader
                .store(Some(SanitizedFile::from_path(&file)))
                .await
                .with_context(|| format!("Failed to store {}", file.display()))?;
            print_json(&uploader.summary().await?)?;
        }
        Commands::Cache { file } => {
            let mut uploader = Uploader::new(scope)?;
            uploader
                .cache(Some(SanitizedFile::from_path(&file)))
                .await
                .with_context(|| format!("Failed to cache {}", file.display()))?;
            print_json(&uploader.summary().await?)?;
        }
        Commands::Download { url, store } => {
            let mut uploader = Uploader::new(scope)?;
            uploader
                .download(&url)
                .await
                .with_context(|| format!("Failed to download {}", url))?;
            if store {
                uploader.store(None).await.context("Failed to store download")?;
            }
            print_json(&uploader.summary().await?)?;
        }
        Commands::Retrieve { identifier } => {
            let mut uploader = Uploader::new(scope)?;
            uploader
                .retrieve_from_store(&identifier)
                .await
                .with_context(|| format!("Failed to retrieve {}", identifier))?;
            print_json(&uploader.summary().await?)?;
        }
        Commands::Delete { identifier } => {
            let mut uploader = Uploader::new(scope)?;
            uploader
                .retrieve_from_store(&identifier)
                .await
                .with_context(|| format!("Failed to retrieve {}", identifier))?;
            let deleted = uploader.remove().await?;
            print_json(&serde_json::json!({ "identifier": identifier, "deleted": deleted }))?;
        }
        Commands::CleanCache { older_than_secs } => {
            let removed = clean_cached_files(&scope, Duration::from_secs(older_than_secs)).await?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Commands::Config => {
            print_json(&config_snapshot(&scope)?)?;
        }
    }

    Ok(())
}
