//! Configuration for the filerelay server.
//!
//! Settings are read from a TOML file (`filerelay.toml` by default). Every
//! section is optional and falls back to defaults suitable for local use:
//!
//! - [`ServerConfig`] - listen address, body limit, CORS
//! - [`StorageConfig`] - blob backend, metadata index, storage root
//! - [`RemoteConfig`] - remote object store connection
//! - [`LoggingConfig`] - log output format

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::storage::{DEFAULT_PAGE_SIZE, ListMethod, RemoteStoreConfig};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "filerelay.toml";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default request body limit: 1 GiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024 * 1024;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub remote: Option<RemoteConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            cors_permissive: true,
        }
    }
}

/// Where blobs live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
    Memory,
}

/// Where descriptors live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// One JSON file per token next to the blobs.
    #[default]
    Sidecar,
    /// Embedded redb database at `{root}/index.redb`.
    Redb,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub index: IndexKind,
    /// Directory holding local blobs and on-disk index data.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            index: IndexKind::Sidecar,
            root: PathBuf::from("./uploads"),
        }
    }
}

impl StorageConfig {
    /// True if anything is written under `root`.
    pub fn uses_root(&self) -> bool {
        self.backend == BackendKind::Local || self.index != IndexKind::Memory
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Storage API root, e.g. `https://project.supabase.co/storage/v1`.
    pub base_url: String,
    pub bucket: String,
    /// API key; may instead be supplied on the command line or environment.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub list_method: ListMethod,
    pub page_size: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            bucket: "upload".to_string(),
            api_key: None,
            timeout_secs: 30,
            connect_timeout_secs: 10,
            list_method: ListMethod::Post,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl RemoteConfig {
    /// Builds the client settings for the remote store.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key is configured.
    pub fn to_store_config(&self) -> Result<RemoteStoreConfig> {
        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .context("remote.api_key is not set (use the config file or FILERELAY_REMOTE_API_KEY)")?;
        Ok(RemoteStoreConfig {
            base_url: self.base_url.clone(),
            bucket: self.bucket.clone(),
            api_key,
            timeout: Duration::from_secs(self.timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            list_method: self.list_method,
            page_size: self.page_size,
        })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl RelayConfig {
    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Fields have invalid types or unknown enum values
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: RelayConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` if given, else from `filerelay.toml` if it exists,
    /// else use defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be loaded.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::load_from(DEFAULT_CONFIG_FILE)
            },
            None => Ok(Self::default()),
        }
    }

    /// Validate configuration with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails with one or more errors:
    /// - Port 0 or zero body limit
    /// - Remote backend without a usable `[remote]` section
    /// - Empty storage root when something is stored on disk
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Server
        if self.server.port == 0 {
            errors.push("server.port cannot be 0".to_string());
        }
        if self.server.max_body_bytes == 0 {
            errors.push("server.max_body_bytes cannot be 0".to_string());
        }

        // 2. Storage
        if self.storage.uses_root() && self.storage.root.as_os_str().is_empty() {
            errors.push("storage.root cannot be empty".to_string());
        }
        if self.storage.index == IndexKind::Memory && self.storage.backend != BackendKind::Memory
        {
            warnings.push(
                "storage.index = \"memory\" with a persistent backend\n  \
                 Descriptors are lost on restart; stored blobs become orphans"
                    .to_string(),
            );
        }

        // 3. Remote
        match (&self.remote, self.storage.backend) {
            (None, BackendKind::Remote) => {
                errors.push("storage.backend = \"remote\" requires a [remote] section".to_string());
            },
            (Some(remote), backend) => {
                match url::Url::parse(&remote.base_url) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => {},
                    Ok(url) => errors.push(format!(
                        "remote.base_url must be http or https (got scheme '{}')",
                        url.scheme()
                    )),
                    Err(e) => errors.push(format!(
                        "remote.base_url is not a valid URL '{}': {e}",
                        remote.base_url
                    )),
                }
                if remote.bucket.trim().is_empty() {
                    errors.push("remote.bucket cannot be empty".to_string());
                }
                if remote.timeout_secs == 0 {
                    errors.push("remote.timeout_secs cannot be 0".to_string());
                }
                if remote.connect_timeout_secs == 0 {
                    errors.push("remote.connect_timeout_secs cannot be 0".to_string());
                }
                if remote.page_size == 0 {
                    errors.push("remote.page_size cannot be 0".to_string());
                }
                if backend != BackendKind::Remote {
                    warnings.push(
                        "[remote] section is ignored unless storage.backend = \"remote\"".to_string(),
                    );
                }
            },
            (None, _) => {},
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }
}
