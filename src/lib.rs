//! filerelay: a file-transfer relay.
//!
//! Clients upload a file and get back an opaque token; anyone holding the
//! token can download or delete the file, and receivers can list the files
//! addressed to them. Files live in a pluggable blob backend (local disk,
//! remote object store, or memory) with descriptors kept in a metadata index.
//!
//! - [`storage`] - the storage layer and its backends
//! - [`http`] - the axum HTTP API
//! - [`config`] - TOML configuration
//! - [`commands`] - CLI commands

pub mod commands;
pub mod config;
pub mod http;
pub mod logging;
pub mod startup;
pub mod storage;
