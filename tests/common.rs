//! Shared helpers for filerelay integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};

use filerelay::storage::{
    BlobBackend, BlobEntry, BlobReader, ByteStream, FileDescriptor, MemoryBlobBackend,
    MemoryIndex, MetadataIndex, Result, StorageError,
};

/// A stream yielding `data` in chunks of `chunk` bytes.
pub fn byte_stream(data: &[u8], chunk: usize) -> ByteStream<'static> {
    let chunks: Vec<io::Result<Bytes>> = data
        .chunks(chunk.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks).boxed()
}

/// Collects a download stream into one buffer.
pub async fn collect(stream: ByteStream<'static>) -> Vec<u8> {
    let chunks: Vec<Bytes> = stream.try_collect().await.expect("stream failed");
    chunks.concat()
}

/// Index whose writes can be switched to fail, simulating a crash between
/// the blob write and the descriptor write.
#[derive(Default)]
pub struct FlakyIndex {
    pub inner: MemoryIndex,
    pub fail_puts: AtomicBool,
}

impl FlakyIndex {
    pub fn failing() -> Self {
        Self {
            inner: MemoryIndex::new(),
            fail_puts: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl MetadataIndex for FlakyIndex {
    async fn put(&self, descriptor: &FileDescriptor) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::write_failed(
                format!("index record {}", descriptor.token),
                "simulated crash",
            ));
        }
        self.inner.put(descriptor).await
    }

    async fn get(&self, token: &str) -> Result<FileDescriptor> {
        self.inner.get(token).await
    }

    async fn scan(&self) -> Result<Vec<FileDescriptor>> {
        self.inner.scan().await
    }

    async fn remove(&self, token: &str) -> Result<()> {
        self.inner.remove(token).await
    }
}

/// Backend whose removals can be switched to fail.
#[derive(Default)]
pub struct StubbornBackend {
    pub inner: MemoryBlobBackend,
    pub fail_removes: AtomicBool,
}

#[async_trait]
impl BlobBackend for StubbornBackend {
    fn name(&self) -> &'static str {
        "stubborn"
    }

    async fn put(&self, key: &str, content_type: &str, stream: ByteStream<'_>) -> Result<u64> {
        self.inner.put(key, content_type, stream).await
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        self.inner.get(key).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed {
                target: format!("blob {key}"),
                status: Some(503),
                reason: "backend unavailable".to_string(),
            });
        }
        self.inner.remove(key).await
    }

    async fn list(&self) -> Result<Vec<BlobEntry>> {
        self.inner.list().await
    }
}
