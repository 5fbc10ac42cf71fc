//! Consistency check between the blob backend and the metadata index.
//!
//! Uploads write the blob before the descriptor, so an interrupted upload
//! leaves an orphan blob. A blob removed behind the service's back leaves a
//! dangling descriptor. `reconcile` reports both without changing anything;
//! `purge_orphans` removes orphan blobs past a grace period.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use super::error::{Result, StorageError};
use super::service::StorageService;
use super::types::{BlobEntry, FileDescriptor};
use super::validation::token_from_blob_key;

/// Result of comparing backend contents with the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Blobs that no descriptor references.
    pub orphan_blobs: Vec<BlobEntry>,
    /// Descriptors whose blob is missing.
    pub dangling: Vec<FileDescriptor>,
}

impl ReconcileReport {
    /// True when backend and index agree.
    pub fn is_clean(&self) -> bool {
        self.orphan_blobs.is_empty() && self.dangling.is_empty()
    }
}

impl StorageService {
    /// Compares the backend listing with the index. Read-only.
    ///
    /// Only backend entries shaped like blob keys are considered, so foreign
    /// objects in a shared bucket are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ReadFailed` if either side cannot be enumerated.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        // Backend first: an upload finishing between the two reads then shows
        // up as referenced rather than orphaned.
        let blobs: Vec<BlobEntry> = self
            .backend
            .list()
            .await?
            .into_iter()
            .filter(|b| token_from_blob_key(&b.key).is_some())
            .collect();
        let descriptors = self.index.scan().await?;

        let referenced: HashSet<&str> = descriptors
            .iter()
            .map(|d| d.storage_key.as_str())
            .collect();
        let present: HashSet<&str> = blobs.iter().map(|b| b.key.as_str()).collect();

        let dangling: Vec<FileDescriptor> = descriptors
            .iter()
            .filter(|d| !present.contains(d.storage_key.as_str()))
            .cloned()
            .collect();
        let orphan_blobs: Vec<BlobEntry> = blobs
            .iter()
            .filter(|b| !referenced.contains(b.key.as_str()))
            .cloned()
            .collect();

        info!(
            backend = self.backend.name(),
            blobs = blobs.len(),
            descriptors = descriptors.len(),
            orphan_blobs = orphan_blobs.len(),
            dangling = dangling.len(),
            "Storage reconciled"
        );

        Ok(ReconcileReport {
            orphan_blobs,
            dangling,
        })
    }

    /// Removes orphan blobs last modified at least `min_age` ago.
    ///
    /// Blobs without a modification time are kept. Returns the number of
    /// blobs removed; individual removal failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `ReadFailed` if the reconciliation listing fails.
    pub async fn purge_orphans(&self, min_age: Duration) -> Result<usize> {
        let report = self.reconcile().await?;
        let min_age = chrono::Duration::from_std(min_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        let mut removed = 0;
        for blob in report.orphan_blobs {
            let Some(modified) = blob.modified else {
                continue;
            };
            if now.signed_duration_since(modified) < min_age {
                continue;
            }
            match self.backend.remove(&blob.key).await {
                Ok(()) => {
                    info!(key = %blob.key, size = blob.size, "Removed orphan blob");
                    removed += 1;
                },
                Err(StorageError::NotFound(_)) => {},
                Err(e) => warn!(key = %blob.key, error = %e, "Failed to remove orphan blob"),
            }
        }
        Ok(removed)
    }
}
