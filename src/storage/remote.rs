//! Remote object store backend.
//!
//! Talks to a Supabase-style storage REST API:
//!
//! - `POST   {base}/object/{bucket}/{key}` uploads an object
//! - `DELETE {base}/object/{bucket}/{key}` removes it
//! - `POST   {base}/object/list/{bucket}` (or `GET` with query parameters) lists
//! - `GET    {base}/object/public/{bucket}/{key}` serves it publicly
//!
//! Uploads are buffered in memory before being sent, so the largest accepted
//! file is bounded by available memory.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::backend::BlobBackend;
use super::error::{Result, StorageError};
use super::types::{BlobEntry, BlobReader, ByteStream};
use super::validation::ensure_bare_key;

/// Everything except unreserved characters is percent-encoded in keys.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Default number of entries requested per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound on listing requests for one `list` call.
pub const MAX_LIST_PAGES: usize = 10_000;

/// How the listing endpoint is called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMethod {
    /// `POST` with a JSON body.
    #[default]
    Post,
    /// `GET` with query parameters.
    Get,
}

/// Connection settings for [`RemoteObjectStore`].
#[derive(Clone)]
pub struct RemoteStoreConfig {
    /// Storage API root, e.g. `https://project.supabase.co/storage/v1`.
    pub base_url: String,
    pub bucket: String,
    pub api_key: String,
    /// Total time allowed for one request, including the body.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub list_method: ListMethod,
    pub page_size: usize,
}

impl RemoteStoreConfig {
    /// Creates a config with default timeouts and listing settings.
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            bucket: bucket.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            list_method: ListMethod::Post,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl fmt::Debug for RemoteStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStoreConfig")
            .field("base_url", &self.base_url)
            .field("bucket", &self.bucket)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("list_method", &self.list_method)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Blob backend backed by a remote object store.
#[derive(Debug, Clone)]
pub struct RemoteObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    list_method: ListMethod,
    page_size: usize,
}

impl RemoteObjectStore {
    /// Builds the HTTP client and validates the connection settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not http(s), the bucket is empty,
    /// the page size is zero, or the API key is not a valid header value.
    pub fn new(config: RemoteStoreConfig) -> anyhow::Result<Self> {
        let parsed = url::Url::parse(&config.base_url)
            .with_context(|| format!("Invalid remote base URL: {}", config.base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("Remote base URL must be http or https: {}", config.base_url);
        }
        if config.bucket.trim().is_empty() {
            bail!("Remote bucket name is empty");
        }
        if config.page_size == 0 {
            bail!("Remote listing page size must be at least 1");
        }

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .context("Remote API key is not a valid header value")?;
        bearer.set_sensitive(true);
        let mut apikey = HeaderValue::from_str(&config.api_key)
            .context("Remote API key is not a valid header value")?;
        apikey.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("apikey", apikey);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create remote storage HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket,
            list_method: config.list_method,
            page_size: config.page_size,
        })
    }

    fn bucket_segment(&self) -> String {
        utf8_percent_encode(&self.bucket, KEY_ENCODE_SET).to_string()
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/object/{}/{}",
            self.base_url,
            self.bucket_segment(),
            encode_key(key)
        )
    }

    fn list_url(&self) -> String {
        format!("{}/object/list/{}", self.base_url, self.bucket_segment())
    }

    /// Fetches an object by explicit URL.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the store reports the object missing,
    /// `ReadFailed` on other failures.
    pub async fn get_url(&self, url: &str) -> Result<BlobReader> {
        let target = format!("object {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::read_failed(&target, transport_reason(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let (status, body) = read_failure(response).await;
            if status == StatusCode::NOT_FOUND || body_reports_not_found(&body) {
                return Err(StorageError::not_found(target));
            }
            return Err(StorageError::ReadFailed {
                target,
                status: Some(status.as_u16()),
                reason: body,
            });
        }

        let size = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();
        Ok(BlobReader { stream, size })
    }

    async fn list_page(&self, offset: usize) -> Result<Value> {
        let target = format!("listing of bucket {}", self.bucket);
        let request = match self.list_method {
            ListMethod::Post => self.client.post(self.list_url()).json(&serde_json::json!({
                "prefix": "",
                "limit": self.page_size,
                "offset": offset,
                "sortBy": { "column": "name", "order": "asc" },
            })),
            ListMethod::Get => {
                let mut url = url::Url::parse(&self.list_url())
                    .map_err(|e| StorageError::read_failed(&target, e))?;
                url.query_pairs_mut()
                    .append_pair("prefix", "")
                    .append_pair("limit", &self.page_size.to_string())
                    .append_pair("offset", &offset.to_string())
                    .append_pair("sortBy.column", "name")
                    .append_pair("sortBy.order", "asc");
                self.client.get(url)
            },
        };

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::read_failed(&target, transport_reason(&e)))?;
        if !response.status().is_success() {
            let (status, body) = read_failure(response).await;
            return Err(StorageError::ReadFailed {
                target,
                status: Some(status.as_u16()),
                reason: body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| StorageError::read_failed(&target, format!("invalid listing body: {e}")))
    }
}

/// Percent-encodes a key for use as a single URL path segment.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else {
        format!("transport error: {e}")
    }
}

async fn read_failure(response: Response) -> (StatusCode, String) {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
    (status, body)
}

/// Whether a provider error body describes a missing object.
///
/// Some stores answer a missing object with a 400 whose JSON body carries
/// `"statusCode": "404"` or `"error": "not_found"`.
pub(crate) fn body_reports_not_found(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let status_404 = match value.get("statusCode") {
        Some(Value::String(s)) => s == "404",
        Some(Value::Number(n)) => n.as_u64() == Some(404),
        _ => false,
    };
    let error_not_found = value
        .get("error")
        .and_then(Value::as_str)
        .is_some_and(|e| e.eq_ignore_ascii_case("not_found") || e.eq_ignore_ascii_case("not found"));
    status_404 || error_not_found
}

/// One parsed listing page.
#[derive(Debug, Default)]
pub(crate) struct ListPage {
    /// Usable object entries.
    pub entries: Vec<BlobEntry>,
    /// Raw number of rows, which drives pagination.
    pub rows: usize,
    /// Every row name, placeholders included.
    pub names: Vec<String>,
}

/// Parses one listing page.
///
/// Rows without a `name` and folder placeholders (no `id` and no `metadata`)
/// yield no entry. Sizes that cannot be read become 0.
pub(crate) fn parse_list_page(page: &Value) -> Result<ListPage> {
    let rows = page.as_array().ok_or_else(|| {
        StorageError::read_failed("object listing", "listing body is not a JSON array")
    })?;

    let mut entries = Vec::with_capacity(rows.len());
    let mut names = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(name) = row.get("name").and_then(Value::as_str) else {
            debug!("Skipping listing entry without a name");
            continue;
        };
        names.push(name.to_string());
        let has_id = row.get("id").is_some_and(|v| !v.is_null());
        let metadata = row.get("metadata").filter(|v| !v.is_null());
        if !has_id && metadata.is_none() {
            continue;
        }

        let size = match metadata.and_then(|m| m.get("size")) {
            Some(raw) => parse_size(raw).unwrap_or_else(|| {
                debug!(key = name, size = %raw, "Unparsable object size, using 0");
                0
            }),
            None => 0,
        };
        let modified = ["updated_at", "created_at"]
            .iter()
            .filter_map(|field| row.get(*field).and_then(Value::as_str))
            .find_map(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        entries.push(BlobEntry {
            key: name.to_string(),
            size,
            modified,
        });
    }
    Ok(ListPage {
        entries,
        rows: rows.len(),
        names,
    })
}

fn parse_size(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl BlobBackend for RemoteObjectStore {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        mut stream: ByteStream<'_>,
    ) -> Result<u64> {
        ensure_bare_key(key)?;
        let target = format!("object {key}");

        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| StorageError::write_failed(&target, format!("input stream: {e}")))?;
            buf.extend_from_slice(&chunk);
        }
        let size = buf.len() as u64;

        let response = self
            .client
            .post(self.object_url(key))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(buf.freeze())
            .send()
            .await
            .map_err(|e| StorageError::write_failed(&target, transport_reason(&e)))?;

        if !response.status().is_success() {
            let (status, body) = read_failure(response).await;
            return Err(StorageError::WriteFailed {
                target,
                status: Some(status.as_u16()),
                reason: body,
            });
        }

        debug!(key, size, "Object uploaded");
        Ok(size)
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        ensure_bare_key(key)?;
        let url = self.public_url_for(key);
        self.get_url(&url).await.map_err(|e| match e {
            StorageError::NotFound(_) => StorageError::not_found(format!("object {key}")),
            other => other,
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        ensure_bare_key(key)?;
        let target = format!("object {key}");
        let response = self
            .client
            .delete(self.object_url(key))
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(&target, transport_reason(&e)))?;

        if response.status().is_success() {
            return Ok(());
        }
        let (status, body) = read_failure(response).await;
        if status == StatusCode::NOT_FOUND || body_reports_not_found(&body) {
            return Err(StorageError::not_found(target));
        }
        Err(StorageError::DeleteFailed {
            target,
            status: Some(status.as_u16()),
            reason: body,
        })
    }

    async fn list(&self) -> Result<Vec<BlobEntry>> {
        let target = format!("listing of bucket {}", self.bucket);
        let mut all = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut offset = 0;

        for _ in 0..MAX_LIST_PAGES {
            let page = parse_list_page(&self.list_page(offset).await?)?;
            all.extend(page.entries);
            if page.rows < self.page_size {
                all.sort_by(|a, b| a.key.cmp(&b.key));
                all.dedup_by(|a, b| a.key == b.key);
                return Ok(all);
            }

            // A full page with nothing new means the store ignored `offset`.
            let mut advanced = false;
            for name in page.names {
                advanced |= seen.insert(name);
            }
            if !advanced {
                warn!(bucket = %self.bucket, offset, "Object listing stopped advancing");
                return Err(StorageError::read_failed(
                    target,
                    format!("listing did not advance at offset {offset}"),
                ));
            }
            offset += page.rows;
        }

        Err(StorageError::read_failed(
            target,
            format!("listing exceeded {MAX_LIST_PAGES} pages"),
        ))
    }

    fn public_url(&self, key: &str) -> Option<String> {
        Some(self.public_url_for(key))
    }
}

impl RemoteObjectStore {
    /// Deterministic public URL of an object.
    pub fn public_url_for(&self, key: &str) -> String {
        format!(
            "{}/object/public/{}/{}",
            self.base_url,
            self.bucket_segment(),
            encode_key(key)
        )
    }
}
