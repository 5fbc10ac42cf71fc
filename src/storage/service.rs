//! `StorageService`: the upload, download, list and delete orchestrator.
//!
//! The service is written once against the [`MetadataIndex`] and
//! [`BlobBackend`] traits. Uploads always write the blob before the
//! descriptor, and deletes always remove the blob before the descriptor, so a
//! crash can leave an orphan blob but never a descriptor pointing at nothing.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::backend::BlobBackend;
use super::error::{Result, StorageError};
use super::index::{MemoryIndex, MetadataIndex, SidecarIndex};
use super::local::LocalDiskBackend;
use super::memory::MemoryBlobBackend;
use super::types::{ByteStream, Download, FileDescriptor, UploadRequest, UploadStage};
use super::validation::{blob_key, new_token, sanitize_file_name};

/// Content type used when neither the client nor the extension provides one.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// File relay storage service.
///
/// # Thread Safety
///
/// `StorageService` is `Clone` and can be shared across tasks. Operations on
/// different tokens never contend; there is no service-wide lock.
///
/// # Example
///
/// ```ignore
/// use filerelay::storage::{StorageService, UploadRequest};
///
/// let storage = StorageService::memory();
/// let descriptor = storage
///     .upload(UploadRequest::new("notes.txt", stream).receiver("b"))
///     .await?;
/// let download = storage.download(&descriptor.token).await?;
/// ```
#[derive(Clone)]
pub struct StorageService {
    pub(super) index: Arc<dyn MetadataIndex>,
    pub(super) backend: Arc<dyn BlobBackend>,
}

impl StorageService {
    /// Creates a service over the given index and backend.
    pub fn new<I: MetadataIndex, B: BlobBackend>(index: I, backend: B) -> Self {
        Self {
            index: Arc::new(index),
            backend: Arc::new(backend),
        }
    }

    /// Creates a service from already shared trait objects.
    pub fn from_parts(index: Arc<dyn MetadataIndex>, backend: Arc<dyn BlobBackend>) -> Self {
        Self { index, backend }
    }

    /// Creates a service storing blobs and sidecar records in one directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` does not exist or is not a directory.
    pub fn local<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref();
        Ok(Self::new(
            SidecarIndex::open(root)?,
            LocalDiskBackend::open(root)?,
        ))
    }

    /// Creates a non-persistent service. All data is lost on exit.
    pub fn memory() -> Self {
        Self::new(MemoryIndex::new(), MemoryBlobBackend::new())
    }

    /// Name of the blob backend, for logs.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Stores a file and records its descriptor.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the filename is unsafe or the stream is empty;
    ///   nothing is written in that case.
    /// - `WriteFailed` if the blob or the descriptor cannot be stored. When
    ///   the descriptor write fails the blob is left behind as an orphan and
    ///   logged.
    pub async fn upload(&self, request: UploadRequest<'_>) -> Result<FileDescriptor> {
        let UploadRequest {
            stream,
            file_name,
            content_type,
            sender,
            receiver,
        } = request;

        let name = sanitize_file_name(&file_name)?;
        let stream = non_empty(stream).await?;
        let content_type = content_type
            .map(|ct| ct.trim().to_string())
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(&name)
                    .first()
                    .map_or_else(|| FALLBACK_CONTENT_TYPE.to_string(), |m| m.essence_str().to_string())
            });
        debug!(name = %name, stage = %UploadStage::Received, "Upload received");

        let token = new_token();
        let key = blob_key(&token, &name);
        debug!(token = %token, key = %key, stage = %UploadStage::BlobWriting, "Writing blob");
        let size = self
            .backend
            .put(&key, &content_type, stream)
            .await
            .map_err(|e| e.in_operation("upload", &token))?;
        debug!(token = %token, size, stage = %UploadStage::BlobWritten, "Blob stored");

        let descriptor = FileDescriptor {
            token: token.clone(),
            name,
            size,
            content_type,
            sender,
            receiver,
            created_at: Utc::now(),
            storage_key: key,
        };

        debug!(token = %token, stage = %UploadStage::IndexWriting, "Writing descriptor");
        if let Err(e) = self.index.put(&descriptor).await {
            warn!(
                orphan_blob = %descriptor.storage_key,
                token = %token,
                backend = self.backend.name(),
                error = %e,
                "Descriptor write failed; blob left without a descriptor"
            );
            return Err(e.in_operation("upload", &token));
        }

        info!(
            token = %token,
            name = %descriptor.name,
            size = descriptor.size,
            stage = %UploadStage::Committed,
            "File uploaded"
        );
        Ok(descriptor)
    }

    /// Opens a stored file for streaming.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the token is unknown or its blob is missing.
    /// - `ReadFailed` if the backend fails or reports a size that differs from
    ///   the descriptor.
    pub async fn download(&self, token: &str) -> Result<Download> {
        let descriptor = self
            .index
            .get(token)
            .await
            .map_err(|e| e.in_operation("download", token))?;
        let reader = self
            .backend
            .get(&descriptor.storage_key)
            .await
            .map_err(|e| e.in_operation("download", token))?;

        if let Some(actual) = reader.size
            && actual != descriptor.size
        {
            return Err(StorageError::read_failed(
                format!("blob {}", descriptor.storage_key),
                format!(
                    "size mismatch: descriptor says {} bytes, backend has {actual}",
                    descriptor.size
                ),
            )
            .in_operation("download", token));
        }

        debug!(token = %token, size = descriptor.size, "Download started");
        Ok(Download {
            descriptor,
            stream: reader.stream,
        })
    }

    /// Returns every descriptor, newest first.
    ///
    /// # Errors
    ///
    /// Returns `ReadFailed` if the index cannot be enumerated.
    pub async fn list(&self) -> Result<Vec<FileDescriptor>> {
        self.index.scan().await
    }

    /// Deletes a file: blob first, then descriptor.
    ///
    /// A blob that is already gone leaves a dangling descriptor, which is
    /// removed and the delete succeeds.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the token is unknown (including a second delete).
    /// - `DeleteFailed` if the blob cannot be removed; the descriptor is kept.
    pub async fn delete(&self, token: &str) -> Result<()> {
        let descriptor = self
            .index
            .get(token)
            .await
            .map_err(|e| e.in_operation("delete", token))?;

        match self.backend.remove(&descriptor.storage_key).await {
            Ok(()) => {},
            Err(StorageError::NotFound(_)) => {
                warn!(
                    token = %token,
                    key = %descriptor.storage_key,
                    "Blob already missing; removing dangling descriptor"
                );
            },
            Err(e) => return Err(e.in_operation("delete", token)),
        }

        self.index
            .remove(token)
            .await
            .map_err(|e| e.in_operation("delete", token))?;

        info!(token = %token, name = %descriptor.name, "File deleted");
        Ok(())
    }

    /// Public URL of a stored file, when the backend serves files directly.
    pub fn public_url(&self, descriptor: &FileDescriptor) -> Option<String> {
        self.backend.public_url(&descriptor.storage_key)
    }
}

/// Waits for the first non-empty chunk and re-attaches it to the stream.
///
/// An empty stream is rejected before any side effect happens.
async fn non_empty(mut stream: ByteStream<'_>) -> Result<ByteStream<'_>> {
    loop {
        match stream.next().await {
            None => return Err(StorageError::invalid_input("file is empty")),
            Some(Err(e)) => {
                return Err(StorageError::invalid_input(format!(
                    "upload stream failed: {e}"
                )));
            },
            Some(Ok(chunk)) if chunk.is_empty() => {},
            Some(Ok(chunk)) => {
                return Ok(futures::stream::once(async move { Ok(chunk) })
                    .chain(stream)
                    .boxed());
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::{TryStreamExt, stream};

    use super::*;

    fn chunks(parts: &[&'static str]) -> ByteStream<'static> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn test_upload_skips_leading_empty_chunks() {
        let storage = StorageService::memory();
        let descriptor = storage
            .upload(UploadRequest::new("a.txt", chunks(&["", "", "hi", "", "!"])))
            .await
            .unwrap();
        assert_eq!(descriptor.size, 3);

        let download = storage.download(&descriptor.token).await.unwrap();
        let body: Vec<Bytes> = download.stream.try_collect().await.unwrap();
        assert_eq!(body.concat(), b"hi!");
    }

    #[tokio::test]
    async fn test_empty_upload_has_no_side_effects() {
        let storage = StorageService::memory();
        let cases: [&[&'static str]; 2] = [&[], &["", ""]];
        for parts in cases {
            let err = storage
                .upload(UploadRequest::new("a.txt", chunks(parts)))
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidInput(_)));
        }
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_content_type_fallbacks() {
        let storage = StorageService::memory();

        let explicit = storage
            .upload(UploadRequest::new("a.bin", chunks(&["x"])).content_type("image/png"))
            .await
            .unwrap();
        assert_eq!(explicit.content_type, "image/png");

        let guessed = storage
            .upload(UploadRequest::new("page.html", chunks(&["x"])).content_type("  "))
            .await
            .unwrap();
        assert_eq!(guessed.content_type, "text/html");

        let unknown = storage
            .upload(UploadRequest::new("blob.zzzunknown", chunks(&["x"])))
            .await
            .unwrap();
        assert_eq!(unknown.content_type, FALLBACK_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_memory_service_has_no_public_urls() {
        let storage = StorageService::memory();
        let descriptor = storage
            .upload(UploadRequest::new("a.txt", chunks(&["x"])))
            .await
            .unwrap();
        assert_eq!(storage.public_url(&descriptor), None);
        assert_eq!(storage.backend_name(), "memory");
    }
}
