//! `filerelay serve` - run the HTTP relay.

use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

use crate::config::RelayConfig;
use crate::{http, startup};

/// Validates the config, opens storage and serves until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the config is invalid, storage cannot be opened, or
/// the server fails.
pub async fn execute(mut config: RelayConfig, port: Option<u16>, root: Option<PathBuf>) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(root) = root {
        config.storage.root = root;
    }

    let validation = config.validate()?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let storage = startup::open_storage(&config.storage, config.remote.as_ref())?;
    http::serve(storage, &config.server).await
}
