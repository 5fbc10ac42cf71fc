//! Backend trait for blob storage.
//!
//! Defines the interface that all blob backends must implement, enabling
//! pluggable storage (local disk, remote object store, memory).

use async_trait::async_trait;

use super::error::Result;
use super::types::{BlobEntry, BlobReader, ByteStream};

/// Backend trait for raw blob storage.
///
/// All backends must be thread-safe (`Send + Sync`) for use with tokio.
/// Keys are produced by the storage service and are always bare filenames of
/// the form `{token}_{name}`.
///
/// # Example
///
/// ```ignore
/// use filerelay::storage::{BlobBackend, MemoryBlobBackend};
///
/// let backend = MemoryBlobBackend::new();
/// let written = backend.put("0123…_notes.txt", "text/plain", stream).await?;
/// let reader = backend.get("0123…_notes.txt").await?;
/// ```
#[async_trait]
pub trait BlobBackend: Send + Sync + 'static {
    /// Short backend name for logs (e.g. `"local"`).
    fn name(&self) -> &'static str;

    /// Stores the full stream under `key` and returns the number of bytes
    /// written. Backends that keep object metadata record `content_type`.
    ///
    /// A blob is visible to readers only once the whole stream has been
    /// stored; a failed or cancelled put leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriteFailed`](super::StorageError::WriteFailed)
    /// on I/O failure, a failing input stream, or a rejected remote request.
    async fn put(&self, key: &str, content_type: &str, stream: ByteStream<'_>)
        -> Result<u64>;

    /// Opens the blob stored under `key` for reading.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the blob does not exist, `ReadFailed` otherwise.
    async fn get(&self, key: &str) -> Result<BlobReader>;

    /// Removes the blob stored under `key`.
    ///
    /// Not idempotent: removing a missing blob is `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the blob does not exist, `DeleteFailed` otherwise.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Lists all stored blobs ordered by key.
    ///
    /// # Errors
    ///
    /// Returns `ReadFailed` if the listing itself cannot be obtained.
    async fn list(&self) -> Result<Vec<BlobEntry>>;

    /// Deterministic public URL for a blob, if the backend serves blobs
    /// directly to clients.
    fn public_url(&self, _key: &str) -> Option<String> {
        None
    }
}
