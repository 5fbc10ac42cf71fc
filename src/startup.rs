//! Storage initialization at process start.
//!
//! The storage root is created here, explicitly, before any backend opens it.
//! Backends themselves never create directories.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{BackendKind, IndexKind, RemoteConfig, StorageConfig};
use crate::storage::{
    BlobBackend, LocalDiskBackend, MemoryBlobBackend, MemoryIndex, MetadataIndex, RedbIndex,
    RemoteObjectStore, SidecarIndex, StorageService,
};

/// File name of the redb index inside the storage root.
pub const REDB_INDEX_FILE: &str = "index.redb";

/// Builds the storage service described by the configuration.
///
/// # Errors
///
/// Returns an error if the storage root cannot be created, an index or
/// backend fails to open, or the remote backend is selected without usable
/// remote settings.
pub fn open_storage(storage: &StorageConfig, remote: Option<&RemoteConfig>) -> Result<StorageService> {
    if storage.uses_root() {
        fs::create_dir_all(&storage.root).with_context(|| {
            format!("Failed to create storage directory: {}", storage.root.display())
        })?;
    }

    let index: Arc<dyn MetadataIndex> = match storage.index {
        IndexKind::Sidecar => Arc::new(SidecarIndex::open(&storage.root)?),
        IndexKind::Redb => Arc::new(RedbIndex::open(storage.root.join(REDB_INDEX_FILE))?),
        IndexKind::Memory => Arc::new(MemoryIndex::new()),
    };

    let backend: Arc<dyn BlobBackend> = match storage.backend {
        BackendKind::Local => Arc::new(LocalDiskBackend::open(&storage.root)?),
        BackendKind::Memory => Arc::new(MemoryBlobBackend::new()),
        BackendKind::Remote => {
            let remote = remote.context("storage.backend = \"remote\" requires a [remote] section")?;
            Arc::new(RemoteObjectStore::new(remote.to_store_config()?)?)
        },
    };

    info!(
        backend = backend.name(),
        index = ?storage.index,
        root = %storage.root.display(),
        "Storage initialized"
    );
    Ok(StorageService::from_parts(index, backend))
}
