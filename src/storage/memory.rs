//! In-memory blob backend.
//!
//! Provides a fast, non-persistent blob store using DashMap for concurrent
//! access. Ideal for testing and ephemeral relays.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;

use super::backend::BlobBackend;
use super::error::{Result, StorageError};
use super::types::{BlobEntry, BlobReader, ByteStream};
use super::validation::ensure_bare_key;

#[derive(Clone)]
struct MemoryBlob {
    data: Bytes,
    modified: DateTime<Utc>,
}

/// In-memory blob backend using DashMap.
///
/// All data is lost when the process exits. A blob becomes visible only after
/// its whole input stream has been buffered.
#[derive(Default)]
pub struct MemoryBlobBackend {
    blobs: DashMap<String, MemoryBlob>,
}

impl MemoryBlobBackend {
    /// Creates a new empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true if no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobBackend for MemoryBlobBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        _content_type: &str,
        mut stream: ByteStream<'_>,
    ) -> Result<u64> {
        ensure_bare_key(key)?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                StorageError::write_failed(format!("blob {key}"), format!("input stream: {e}"))
            })?;
            buf.extend_from_slice(&chunk);
        }

        let size = buf.len() as u64;
        match self.blobs.entry(key.to_string()) {
            Entry::Occupied(_) => Err(StorageError::write_failed(
                format!("blob {key}"),
                "blob already exists",
            )),
            Entry::Vacant(slot) => {
                slot.insert(MemoryBlob {
                    data: buf.freeze(),
                    modified: Utc::now(),
                });
                Ok(size)
            },
        }
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        let blob = self
            .blobs
            .get(key)
            .map(|b| b.data.clone())
            .ok_or_else(|| StorageError::not_found(format!("blob {key}")))?;

        let size = blob.len() as u64;
        Ok(BlobReader {
            stream: futures::stream::once(async move { Ok(blob) }).boxed(),
            size: Some(size),
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.blobs
            .remove(key)
            .map(drop)
            .ok_or_else(|| StorageError::not_found(format!("blob {key}")))
    }

    async fn list(&self) -> Result<Vec<BlobEntry>> {
        let mut entries: Vec<BlobEntry> = self
            .blobs
            .iter()
            .map(|b| BlobEntry {
                key: b.key().clone(),
                size: b.value().data.len() as u64,
                modified: Some(b.value().modified),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
