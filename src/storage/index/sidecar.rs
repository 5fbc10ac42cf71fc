//! Sidecar-file metadata index.
//!
//! One JSON record per token at `{root}/{token}.json`. Records are written to
//! a hidden temp file in the same directory, fsynced, and published with a
//! no-clobber rename, so concurrent uploads never corrupt each other and a
//! crash mid-write leaves at most a temp file that `scan` ignores.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;

use super::{MetadataIndex, sort_for_scan};
use crate::storage::error::{Result, StorageError};
use crate::storage::local::{TEMP_PREFIX, TEMP_SUFFIX};
use crate::storage::types::FileDescriptor;
use crate::storage::validation::is_valid_token;

const RECORD_EXTENSION: &str = "json";

/// Metadata index storing one JSON sidecar file per token.
///
/// # Thread Safety
///
/// `SidecarIndex` is `Clone`; records are independent files, so no lock is
/// held across records. `scan` is therefore eventually consistent with
/// concurrent writers.
#[derive(Debug, Clone)]
pub struct SidecarIndex {
    root: PathBuf,
}

impl SidecarIndex {
    /// Opens the index in an existing directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` does not exist or is not a directory.
    pub fn open<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let meta = fs::metadata(&root)
            .with_context(|| format!("Index directory not accessible: {}", root.display()))?;
        if !meta.is_dir() {
            bail!("Index root is not a directory: {}", root.display());
        }
        Ok(Self { root })
    }

    fn record_path(&self, token: &str) -> PathBuf {
        self.root.join(format!("{token}.{RECORD_EXTENSION}"))
    }

    fn put_sync(&self, descriptor: &FileDescriptor) -> Result<()> {
        let token = &descriptor.token;
        if !is_valid_token(token) {
            return Err(StorageError::invalid_input(format!(
                "malformed token: {token:?}"
            )));
        }
        let target = format!("index record {token}");
        let json = serde_json::to_vec_pretty(descriptor)
            .map_err(|e| StorageError::write_failed(&target, e))?;

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(|e| StorageError::write_failed(&target, format!("create temp file: {e}")))?;
        temp.write_all(&json)
            .map_err(|e| StorageError::write_failed(&target, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| StorageError::write_failed(&target, format!("fsync: {e}")))?;

        temp.persist_noclobber(self.record_path(token))
            .map_err(|e| {
                if e.error.kind() == io::ErrorKind::AlreadyExists {
                    StorageError::DuplicateToken(token.clone())
                } else {
                    StorageError::write_failed(&target, format!("publish: {}", e.error))
                }
            })?;
        Ok(())
    }

    fn get_sync(&self, token: &str) -> Result<FileDescriptor> {
        if !is_valid_token(token) {
            return Err(StorageError::not_found(format!("token {token}")));
        }
        let path = self.record_path(token);
        let json = fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::not_found(format!("token {token}"))
            } else {
                StorageError::read_failed(format!("index record {token}"), e)
            }
        })?;
        serde_json::from_slice(&json)
            .map_err(|e| StorageError::read_failed(format!("index record {token}"), e))
    }

    fn scan_sync(&self) -> Result<Vec<FileDescriptor>> {
        // The root path stays in the logs, out of client-facing errors.
        let read_err = |e: io::Error| {
            tracing::warn!(root = %self.root.display(), error = %e, "Index directory unreadable");
            StorageError::read_failed("index scan", e)
        };
        let entries = fs::read_dir(&self.root).map_err(read_err)?;

        let mut descriptors = Vec::new();
        for entry in entries {
            let entry = entry.map_err(read_err)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(token) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_token(token) {
                continue;
            }

            // Records can disappear mid-scan when a delete races with it.
            match self.get_sync(token) {
                Ok(descriptor) if descriptor.token == token => descriptors.push(descriptor),
                Ok(descriptor) => {
                    tracing::warn!(
                        path = %path.display(),
                        recorded = %descriptor.token,
                        "Skipping index record whose token does not match its file name"
                    );
                },
                Err(StorageError::NotFound(_)) => {},
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable index record");
                },
            }
        }

        sort_for_scan(&mut descriptors);
        Ok(descriptors)
    }

    fn remove_sync(&self, token: &str) -> Result<()> {
        if !is_valid_token(token) {
            return Err(StorageError::not_found(format!("token {token}")));
        }
        fs::remove_file(self.record_path(token)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::not_found(format!("token {token}"))
            } else {
                StorageError::delete_failed(format!("index record {token}"), e)
            }
        })
    }
}

fn join_error(operation: &str, e: &tokio::task::JoinError) -> StorageError {
    StorageError::read_failed(format!("index {operation}"), format!("task join error: {e}"))
}

#[async_trait]
impl MetadataIndex for SidecarIndex {
    async fn put(&self, descriptor: &FileDescriptor) -> Result<()> {
        let index = self.clone();
        let descriptor = descriptor.clone();
        tokio::task::spawn_blocking(move || index.put_sync(&descriptor))
            .await
            .map_err(|e| StorageError::write_failed("index put", format!("task join error: {e}")))?
    }

    async fn get(&self, token: &str) -> Result<FileDescriptor> {
        let index = self.clone();
        let token = token.to_string();
        tokio::task::spawn_blocking(move || index.get_sync(&token))
            .await
            .map_err(|e| join_error("get", &e))?
    }

    async fn scan(&self) -> Result<Vec<FileDescriptor>> {
        let index = self.clone();
        tokio::task::spawn_blocking(move || index.scan_sync())
            .await
            .map_err(|e| join_error("scan", &e))?
    }

    async fn remove(&self, token: &str) -> Result<()> {
        let index = self.clone();
        let token = token.to_string();
        tokio::task::spawn_blocking(move || index.remove_sync(&token))
            .await
            .map_err(|e| StorageError::delete_failed("index remove", format!("task join error: {e}")))?
    }
}
