//! Types shared by the storage layer.

use std::fmt;
use std::io;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Boxed asynchronous byte stream accepted and returned by the storage layer.
///
/// Upload streams may borrow from the request (e.g. a multipart field), so the
/// lifetime is explicit. Download streams are always `'static`.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Record held by the metadata index for each stored file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Opaque handle, 32 lowercase hex characters.
    pub token: String,
    /// Sanitized original filename.
    pub name: String,
    /// Size in bytes of the stored blob.
    pub size: u64,
    /// MIME content type.
    pub content_type: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Backend location of the blob. Never shown to clients.
    pub storage_key: String,
}

/// Input to [`StorageService::upload`](super::StorageService::upload).
pub struct UploadRequest<'a> {
    pub stream: ByteStream<'a>,
    /// Client-supplied filename; sanitized before use.
    pub file_name: String,
    pub content_type: Option<String>,
    pub sender: Option<String>,
    pub receiver: Option<String>,
}

impl<'a> UploadRequest<'a> {
    /// Creates a request with no content type, sender or receiver.
    pub fn new(file_name: impl Into<String>, stream: ByteStream<'a>) -> Self {
        Self {
            stream,
            file_name: file_name.into(),
            content_type: None,
            sender: None,
            receiver: None,
        }
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    #[must_use]
    pub fn receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }
}

impl fmt::Debug for UploadRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .finish_non_exhaustive()
    }
}

/// A file being served back to a client.
pub struct Download {
    pub descriptor: FileDescriptor,
    pub stream: ByteStream<'static>,
}

impl Download {
    /// Name the client should save the file under.
    pub fn display_name(&self) -> &str {
        &self.descriptor.name
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Result of a backend read.
pub struct BlobReader {
    pub stream: ByteStream<'static>,
    /// Size reported by the backend, when it knows it.
    pub size: Option<u64>,
}

impl fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobReader")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// One row of a backend listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub key: String,
    /// Size in bytes; 0 when the backend could not report it.
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Progress of an upload through the write-then-index sequence.
///
/// Failure at any stage is reported through the returned error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Received,
    BlobWriting,
    BlobWritten,
    IndexWriting,
    Committed,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::Received => "received",
            Self::BlobWriting => "blob_writing",
            Self::BlobWritten => "blob_written",
            Self::IndexWriting => "index_writing",
            Self::Committed => "committed",
        };
        f.write_str(stage)
    }
}
