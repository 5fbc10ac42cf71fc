//! Metadata index: token to [`FileDescriptor`].
//!
//! Every implementation commits each record all-or-nothing, so a crash in
//! the middle of a write never produces a half-written descriptor that a later
//! scan would pick up.

mod memory;
mod redb_index;
mod sidecar;

use async_trait::async_trait;

use super::error::Result;
use super::types::FileDescriptor;

pub use memory::MemoryIndex;
pub use redb_index::RedbIndex;
pub use sidecar::SidecarIndex;

/// Index trait for file descriptors.
///
/// All indexes must be thread-safe (`Send + Sync`) for use with tokio.
#[async_trait]
pub trait MetadataIndex: Send + Sync + 'static {
    /// Inserts a new descriptor, keyed by its token.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateToken` if the token is already indexed, `WriteFailed`
    /// if the record cannot be committed.
    async fn put(&self, descriptor: &FileDescriptor) -> Result<()>;

    /// Looks up a descriptor.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or malformed tokens, `ReadFailed` if the
    /// record exists but cannot be read.
    async fn get(&self, token: &str) -> Result<FileDescriptor>;

    /// Returns all descriptors, newest first.
    ///
    /// Ties on `created_at` are broken by token so the order is stable across
    /// calls with no intervening mutation. Unreadable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ReadFailed` if the index itself cannot be enumerated.
    async fn scan(&self) -> Result<Vec<FileDescriptor>>;

    /// Removes a descriptor. Calling twice is an error the second time.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the token is not indexed, `DeleteFailed` if the
    /// removal cannot be committed.
    async fn remove(&self, token: &str) -> Result<()>;
}

/// Sorts descriptors into scan order: newest first, then by token.
pub(crate) fn sort_for_scan(descriptors: &mut [FileDescriptor]) {
    descriptors.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.token.cmp(&b.token))
    });
}
