//! In-memory metadata index.
//!
//! Non-persistent, backed by `DashMap`. Used by tests and the ephemeral
//! `memory` storage mode.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{MetadataIndex, sort_for_scan};
use crate::storage::error::{Result, StorageError};
use crate::storage::types::FileDescriptor;

/// In-memory metadata index using DashMap.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    records: DashMap<String, FileDescriptor>,
}

impl MemoryIndex {
    /// Creates a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of indexed descriptors.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataIndex for MemoryIndex {
    async fn put(&self, descriptor: &FileDescriptor) -> Result<()> {
        match self.records.entry(descriptor.token.clone()) {
            Entry::Occupied(_) => Err(StorageError::DuplicateToken(descriptor.token.clone())),
            Entry::Vacant(slot) => {
                slot.insert(descriptor.clone());
                Ok(())
            },
        }
    }

    async fn get(&self, token: &str) -> Result<FileDescriptor> {
        self.records
            .get(token)
            .map(|r| r.value().clone())
            .ok_or_else(|| StorageError::not_found(format!("token {token}")))
    }

    async fn scan(&self) -> Result<Vec<FileDescriptor>> {
        let mut descriptors: Vec<FileDescriptor> =
            self.records.iter().map(|r| r.value().clone()).collect();
        sort_for_scan(&mut descriptors);
        Ok(descriptors)
    }

    async fn remove(&self, token: &str) -> Result<()> {
        self.records
            .remove(token)
            .map(drop)
            .ok_or_else(|| StorageError::not_found(format!("token {token}")))
    }
}
