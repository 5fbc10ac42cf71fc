//! Storage layer for the file relay.
//!
//! A stored file is two pieces: a blob held by a [`BlobBackend`] (local disk,
//! remote object store, or memory) and a [`FileDescriptor`] held by a
//! [`MetadataIndex`]. [`StorageService`] keeps the two consistent.
//!
//! Security features:
//! - Client filenames are reduced to a bare name before touching any backend
//! - Tokens are 128 random bits; malformed tokens never reach the filesystem
//! - Blobs and index records are published atomically (temp file + rename)

mod backend;
mod error;
mod inbox;
mod index;
mod local;
mod memory;
mod reconcile;
mod remote;
mod service;
mod types;
mod validation;

pub use backend::BlobBackend;
pub use error::{Result, StorageError};
pub use index::{MemoryIndex, MetadataIndex, RedbIndex, SidecarIndex};
pub use local::LocalDiskBackend;
pub use memory::MemoryBlobBackend;
pub use reconcile::ReconcileReport;
pub use remote::{
    DEFAULT_PAGE_SIZE, ListMethod, MAX_LIST_PAGES, RemoteObjectStore, RemoteStoreConfig, encode_key,
};
pub use service::StorageService;
pub use types::{
    BlobEntry, BlobReader, ByteStream, Download, FileDescriptor, UploadRequest, UploadStage,
};
pub use validation::{
    MAX_NAME_LEN, TOKEN_LEN, blob_key, is_valid_token, new_token, sanitize_file_name,
    token_from_blob_key,
};
