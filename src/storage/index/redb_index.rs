//! Redb-backed metadata index.
//!
//! One row per token in an embedded redb table. Each put or remove runs in
//! its own write transaction, so a record is either fully committed or absent.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{MetadataIndex, sort_for_scan};
use crate::storage::error::{Result, StorageError};
use crate::storage::types::FileDescriptor;

/// Table for descriptor storage: token -> JSON descriptor.
const DESCRIPTORS_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("descriptors");

/// Redb-backed metadata index.
///
/// # Thread Safety
///
/// `RedbIndex` is `Clone` and can be shared across threads. The underlying
/// database serializes write transactions.
#[derive(Clone)]
pub struct RedbIndex {
    db: Arc<Database>,
}

impl RedbIndex {
    /// Opens or creates the index database at `path`.
    ///
    /// The parent directory must already exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the descriptors
    /// table cannot be initialized.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("Failed to open index database: {}", path.display()))?;

        // Initialize table on first open so reads never see a missing table
        let write_txn = db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            let _table = write_txn
                .open_table(DESCRIPTORS_TABLE)
                .context("Failed to initialize descriptors table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    fn put_sync(&self, descriptor: &FileDescriptor) -> Result<()> {
        let token = descriptor.token.as_str();
        let write_err = |e: &dyn Display| StorageError::write_failed(format!("index row {token}"), e);

        let json = serde_json::to_vec(descriptor).map_err(|e| write_err(&e))?;
        let write_txn = self.db.begin_write().map_err(|e| write_err(&e))?;
        let duplicate = {
            let mut table = write_txn
                .open_table(DESCRIPTORS_TABLE)
                .map_err(|e| write_err(&e))?;

            let exists = table.get(token).map_err(|e| write_err(&e))?.is_some();
            if !exists {
                table
                    .insert(token, json.as_slice())
                    .map_err(|e| write_err(&e))?;
            }
            exists
        };

        if duplicate {
            write_txn.abort().map_err(|e| write_err(&e))?;
            return Err(StorageError::DuplicateToken(token.to_string()));
        }
        write_txn.commit().map_err(|e| write_err(&e))?;
        Ok(())
    }

    fn get_sync(&self, token: &str) -> Result<FileDescriptor> {
        let read_err = |e: &dyn Display| StorageError::read_failed(format!("index row {token}"), e);

        let read_txn = self.db.begin_read().map_err(|e| read_err(&e))?;
        let table = read_txn
            .open_table(DESCRIPTORS_TABLE)
            .map_err(|e| read_err(&e))?;

        match table.get(token).map_err(|e| read_err(&e))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(|e| read_err(&e)),
            None => Err(StorageError::not_found(format!("token {token}"))),
        }
    }

    fn scan_sync(&self) -> Result<Vec<FileDescriptor>> {
        let read_err = |e: &dyn Display| StorageError::read_failed("index scan", e);

        let read_txn = self.db.begin_read().map_err(|e| read_err(&e))?;
        let table = read_txn
            .open_table(DESCRIPTORS_TABLE)
            .map_err(|e| read_err(&e))?;

        let mut descriptors = Vec::new();
        for item in table.iter().map_err(|e| read_err(&e))? {
            let (key, value) = item.map_err(|e| read_err(&e))?;
            match serde_json::from_slice::<FileDescriptor>(value.value()) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    tracing::warn!(token = %key.value(), error = %e, "Skipping unreadable index row");
                },
            }
        }

        sort_for_scan(&mut descriptors);
        Ok(descriptors)
    }

    fn remove_sync(&self, token: &str) -> Result<()> {
        let delete_err =
            |e: &dyn Display| StorageError::delete_failed(format!("index row {token}"), e);

        let write_txn = self.db.begin_write().map_err(|e| delete_err(&e))?;
        let removed = {
            let mut table = write_txn
                .open_table(DESCRIPTORS_TABLE)
                .map_err(|e| delete_err(&e))?;
            table
                .remove(token)
                .map_err(|e| delete_err(&e))?
                .is_some()
        };
        if !removed {
            write_txn.abort().map_err(|e| delete_err(&e))?;
            return Err(StorageError::not_found(format!("token {token}")));
        }
        write_txn.commit().map_err(|e| delete_err(&e))?;
        Ok(())
    }
}

#[async_trait]
impl MetadataIndex for RedbIndex {
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
            .map_err(|e| StorageError::read_failed("index get", format!("task join error: {e}")))?
    }

    async fn scan(&self) -> Result<Vec<FileDescriptor>> {
        let index = self.clone();
        tokio::task::spawn_blocking(move || index.scan_sync())
            .await
            .map_err(|e| StorageError::read_failed("index scan", format!("task join error: {e}")))?
    }

    async fn remove(&self, token: &str) -> Result<()> {
        let index = self.clone();
        let token = token.to_string();
        tokio::task::spawn_blocking(move || index.remove_sync(&token))
            .await
            .map_err(|e| StorageError::delete_failed("index remove", format!("task join error: {e}")))?
    }
}
