//! `filerelay reconcile` - compare stored blobs with the index.

use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::config::RelayConfig;
use crate::startup;
use crate::storage::ReconcileReport;

/// Prints the reconciliation report and optionally purges old orphans.
///
/// # Errors
///
/// Returns an error if the config is invalid or either side of the storage
/// cannot be listed.
pub async fn execute(config: RelayConfig, purge_older_than: Option<u64>) -> Result<()> {
    let validation = config.validate()?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let storage = startup::open_storage(&config.storage, config.remote.as_ref())?;
    let report = storage.reconcile().await?;
    print!("{}", render_report(&report));

    if let Some(secs) = purge_older_than {
        let removed = storage.purge_orphans(Duration::from_secs(secs)).await?;
        println!("Purged {removed} orphan blob(s) older than {secs}s");
    }
    Ok(())
}

fn render_report(report: &ReconcileReport) -> String {
    use std::fmt::Write;

    if report.is_clean() {
        return "Storage is consistent: every blob has a descriptor and every descriptor has a blob\n"
            .to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "Orphan blobs (no descriptor): {}", report.orphan_blobs.len());
    for blob in &report.orphan_blobs {
        let modified = blob
            .modified
            .map_or_else(|| "unknown".to_string(), |m| m.to_rfc3339());
        let _ = writeln!(out, "  {}  {} bytes  modified {modified}", blob.key, blob.size);
    }
    let _ = writeln!(out, "Dangling descriptors (blob missing): {}", report.dangling.len());
    for descriptor in &report.dangling {
        let _ = writeln!(out, "  {}  {}", descriptor.token, descriptor.name);
    }
    out
}
