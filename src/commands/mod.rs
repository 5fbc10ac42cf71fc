//! CLI command implementations for filerelay.
//!
//! - [`serve`] - Run the HTTP relay
//! - [`reconcile`] - Compare stored blobs with the index, optionally purge
//!   orphans

pub mod reconcile;
pub mod serve;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use tracing::warn;

use crate::config::RelayConfig;
use crate::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "filerelay")]
#[command(version, about = "File-transfer relay with local or remote object storage")]
pub struct Cli {
    /// Path to the TOML config file (defaults to ./filerelay.toml if present)
    #[arg(short, long, global = true, env = "FILERELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Remote object store API key (overrides remote.api_key)
    #[arg(long, global = true, env = "FILERELAY_REMOTE_API_KEY", hide_env_values = true)]
    pub remote_api_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP relay
    Serve {
        /// Port to listen on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Storage root directory (overrides storage.root)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Report orphan blobs and dangling descriptors
    Reconcile {
        /// Remove orphan blobs older than this many seconds
        #[arg(long, value_name = "SECS")]
        purge_older_than: Option<u64>,
    },
}

impl Cli {
    /// Loads the config file named by `--config`, or the default one.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded.
    pub fn load_config(&self) -> Result<RelayConfig> {
        RelayConfig::load_or_default(self.config.as_deref())
    }

    /// Applies global overrides to `config`.
    ///
    /// Returns a warning for each override that had nothing to apply to.
    pub fn apply_overrides(&self, config: &mut RelayConfig) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(key) = &self.remote_api_key {
            match config.remote.as_mut() {
                Some(remote) => remote.api_key = Some(key.clone()),
                None => warnings.push(
                    "Remote API key from --remote-api-key / FILERELAY_REMOTE_API_KEY ignored: \
                     config has no [remote] section"
                        .to_string(),
                ),
            }
        }
        warnings
    }
}

/// Entry point used by the binary.
///
/// # Errors
///
/// Returns the error of whichever command ran.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = cli.load_config()?;
    init_logging(config.logging.format);
    for warning in cli.apply_overrides(&mut config) {
        warn!("{warning}");
    }

    match cli.command {
        Commands::Serve { port, root } => serve::execute(config, port, root).await,
        Commands::Reconcile { purge_older_than } => {
            reconcile::execute(config, purge_older_than).await
        },
    }
}
