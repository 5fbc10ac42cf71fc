//! Local-disk blob backend.
//!
//! Blobs are plain files named `{token}_{name}` directly under a single root
//! directory. Writes stream into a hidden temp file in the same directory and
//! are published with a no-clobber rename once the whole input has been
//! consumed, so readers never observe a torn blob.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::backend::BlobBackend;
use super::error::{Result, StorageError};
use super::types::{BlobEntry, BlobReader, ByteStream};
use super::validation::{ensure_bare_key, token_from_blob_key};

/// Prefix of in-flight temp files. Never a valid blob key or sidecar record.
pub(crate) const TEMP_PREFIX: &str = ".filerelay-";
pub(crate) const TEMP_SUFFIX: &str = ".part";

/// Read chunk size for download streams.
const CHUNK_SIZE: usize = 64 * 1024;

/// Local-disk blob backend.
///
/// `LocalDiskBackend` is `Clone` and can be shared across tasks; distinct keys
/// map to distinct files, so concurrent writes never contend.
#[derive(Debug, Clone)]
pub struct LocalDiskBackend {
    root: PathBuf,
}

impl LocalDiskBackend {
    /// Opens the backend rooted at an existing directory.
    ///
    /// The directory is not created here; startup code does that explicitly.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` does not exist or is not a directory.
    pub fn open<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let meta = fs::metadata(&root)
            .with_context(|| format!("Storage directory not accessible: {}", root.display()))?;
        if !meta.is_dir() {
            bail!("Storage root is not a directory: {}", root.display());
        }
        Ok(Self { root })
    }

    /// Root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        ensure_bare_key(key)?;
        Ok(self.root.join(key))
    }

    fn list_sync(&self) -> Result<Vec<BlobEntry>> {
        let read_err = |e: io::Error| {
            tracing::warn!(root = %self.root.display(), error = %e, "Storage directory unreadable");
            StorageError::read_failed("blob listing", e)
        };
        let entries = fs::read_dir(&self.root).map_err(read_err)?;

        let mut blobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(read_err)?;
            let Some(key) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if token_from_blob_key(&key).is_none() {
                continue;
            }
            // Files can vanish between read_dir and stat under concurrent deletes.
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            blobs.push(BlobEntry {
                key,
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        blobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(blobs)
    }
}

/// Creates a hidden temp file in `root` and a second handle for writing.
fn create_temp(root: &Path) -> io::Result<(tempfile::NamedTempFile, fs::File)> {
    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(root)?;
    let handle = temp.reopen()?;
    Ok((temp, handle))
}

/// Streams an open file in fixed-size chunks.
fn file_stream(file: tokio::fs::File) -> ByteStream<'static> {
    futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok::<_, io::Error>(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), file)))
    })
    .boxed()
}

#[async_trait]
impl BlobBackend for LocalDiskBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        key: &str,
        _content_type: &str,
        mut stream: ByteStream<'_>,
    ) -> Result<u64> {
        let final_path = self.blob_path(key)?;
        let target = format!("blob {key}");

        // Dropping `temp` (early return, error, or cancelled future) deletes it.
        let root = self.root.clone();
        let (temp, handle) = tokio::task::spawn_blocking(move || create_temp(&root))
            .await
            .map_err(|e| StorageError::write_failed(&target, format!("task join error: {e}")))?
            .map_err(|e| StorageError::write_failed(&target, format!("create temp file: {e}")))?;
        let mut file = tokio::fs::File::from_std(handle);

        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| StorageError::write_failed(&target, format!("input stream: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StorageError::write_failed(&target, e))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| StorageError::write_failed(&target, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::write_failed(&target, format!("fsync: {e}")))?;
        drop(file);

        tokio::task::spawn_blocking(move || temp.persist_noclobber(&final_path).map(drop))
            .await
            .map_err(|e| StorageError::write_failed(&target, format!("task join error: {e}")))?
            .map_err(|e| StorageError::write_failed(&target, format!("publish: {}", e.error)))?;

        tracing::debug!(key, size = written, "Blob written to disk");
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        let path = self.blob_path(key)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::not_found(format!("blob {key}"))
            } else {
                StorageError::read_failed(format!("blob {key}"), e)
            }
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| StorageError::read_failed(format!("blob {key}"), e))?
            .len();

        Ok(BlobReader {
            stream: file_stream(file),
            size: Some(size),
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.blob_path(key)?;
        tokio::fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::not_found(format!("blob {key}"))
            } else {
                StorageError::delete_failed(format!("blob {key}"), e)
            }
        })
    }

    async fn list(&self) -> Result<Vec<BlobEntry>> {
        let backend = self.clone();
        tokio::task::spawn_blocking(move || backend.list_sync())
            .await
            .map_err(|e| StorageError::read_failed("blob listing", format!("task join error: {e}")))?
    }
}
