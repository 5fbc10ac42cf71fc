//! Remote object store integration tests.
//!
//! Runs the backend against a small in-process fake of a Supabase-style
//! storage API served by axum on an ephemeral port.

#[path = "common.rs"]
mod common;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::{byte_stream, collect};
use filerelay::storage::{
    BlobBackend, ListMethod, MemoryIndex, RemoteObjectStore, RemoteStoreConfig, StorageError,
    StorageService, UploadRequest,
};
use serde::Deserialize;
use serde_json::{Value, json};

const API_KEY: &str = "test-key";
const BUCKET: &str = "upload";

#[derive(Clone, Default)]
struct FakeStore {
    objects: Arc<Mutex<BTreeMap<String, (Bytes, String)>>>,
}

impl FakeStore {
    fn insert(&self, key: &str, body: &'static [u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            (Bytes::from_static(body), "text/plain".to_string()),
        );
    }

    fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, ct)| ct.clone())
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {API_KEY}"));
    let apikey = headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == API_KEY);
    bearer && apikey
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "statusCode": "401", "error": "Unauthorized" })),
    )
        .into_response()
}

fn missing() -> Response {
    // The provider answers missing objects with a 400 and a 404 in the body.
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "statusCode": "404", "error": "not_found", "message": "Object not found" })),
    )
        .into_response()
}

async fn upload_object(
    State(store): State<FakeStore>,
    Path((_bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if key.starts_with("reject") {
        return (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large").into_response();
    }
    assert_eq!(
        headers.get("x-upsert").and_then(|v| v.to_str().ok()),
        Some("false")
    );
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut objects = store.objects.lock().unwrap();
    if objects.contains_key(&key) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "statusCode": "409", "error": "Duplicate" })),
        )
            .into_response();
    }
    objects.insert(key.clone(), (body, content_type));
    Json(json!({ "Key": format!("{BUCKET}/{key}") })).into_response()
}

async fn delete_object(
    State(store): State<FakeStore>,
    Path((_bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if key.starts_with("locked") {
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }
    match store.objects.lock().unwrap().remove(&key) {
        Some(_) => Json(json!([{ "name": key }])).into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn public_object(
    State(store): State<FakeStore>,
    Path((_bucket, key)): Path<(String, String)>,
) -> Response {
    match store.objects.lock().unwrap().get(&key) {
        Some((body, _)) => body.clone().into_response(),
        None => missing(),
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: usize,
    offset: usize,
}

fn listing(store: &FakeStore, limit: usize, offset: usize) -> Json<Value> {
    let objects = store.objects.lock().unwrap();
    let mut rows: Vec<Value> = objects
        .iter()
        .map(|(key, (body, ct))| {
            // Alternate numeric and string sizes like real providers do.
            let size = if key.contains("str") {
                json!(body.len().to_string())
            } else {
                json!(body.len())
            };
            json!({
                "name": key,
                "id": format!("id-{key}"),
                "updated_at": "2024-01-01T00:00:00Z",
                "metadata": { "size": size, "mimetype": ct },
            })
        })
        .collect();
    rows.push(json!({ "name": "x_garbage", "id": "g", "metadata": { "size": "lots" } }));
    rows.push(json!({ "name": "zz-folder", "id": null, "metadata": null }));
    rows.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    Json(Value::Array(
        rows.into_iter().skip(offset).take(limit).collect(),
    ))
}

async fn list_post(
    State(store): State<FakeStore>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    assert_eq!(body["sortBy"]["column"], "name");
    assert_eq!(body["sortBy"]["order"], "asc");
    let limit = body["limit"].as_u64().unwrap() as usize;
    let offset = body["offset"].as_u64().unwrap() as usize;
    listing(&store, limit, offset).into_response()
}

async fn list_get(
    State(store): State<FakeStore>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    listing(&store, params.limit, params.offset).into_response()
}

/// Listing that ignores `offset` and `limit` and always returns the same rows.
async fn list_stuck(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!([
        { "name": "a_1.txt", "id": "1", "metadata": { "size": 1 } },
        { "name": "b_2.txt", "id": "2", "metadata": { "size": 2 } },
    ]))
    .into_response()
}

async fn slow_upload() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(5)).await;
    StatusCode::OK
}

async fn start_fake() -> (SocketAddr, FakeStore) {
    let store = FakeStore::default();
    let app = Router::new()
        .route(
            "/storage/v1/object/{bucket}/{key}",
            post(upload_object).delete(delete_object),
        )
        .route("/storage/v1/object/public/{bucket}/{key}", get(public_object))
        .route("/storage/v1/object/list/{bucket}", post(list_post).get(list_get))
        .route("/slow/object/{bucket}/{key}", post(slow_upload))
        .route("/stuck/object/list/{bucket}", post(list_stuck).get(list_stuck))
        .with_state(store.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, store)
}

fn config(addr: SocketAddr) -> RemoteStoreConfig {
    let mut config = RemoteStoreConfig::new(format!("http://{addr}/storage/v1"), BUCKET, API_KEY);
    config.timeout = Duration::from_secs(5);
    config
}

// =============================================================================
// Object operations
// =============================================================================

#[tokio::test]
async fn test_put_get_remove() {
    let (addr, fake) = start_fake().await;
    let store = RemoteObjectStore::new(config(addr)).unwrap();
    let key = "0123456789abcdef0123456789abcdef_my notes.txt";

    assert_eq!(store.put(key, "text/plain", byte_stream(b"hello", 2)).await.unwrap(), 5);
    assert_eq!(fake.content_type(key).as_deref(), Some("text/plain"));

    let reader = store.get(key).await.unwrap();
    assert_eq!(reader.size, Some(5));
    assert_eq!(collect(reader.stream).await, b"hello");

    store.remove(key).await.unwrap();
    assert!(store.remove(key).await.unwrap_err().is_not_found());
    assert!(store.get(key).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_public_url_serves_object() {
    let (addr, fake) = start_fake().await;
    fake.insert("k_a b.txt", b"public");
    let store = RemoteObjectStore::new(config(addr)).unwrap();

    let url = store.public_url("k_a b.txt").unwrap();
    assert_eq!(
        url,
        format!("http://{addr}/storage/v1/object/public/upload/k_a%20b.txt")
    );
    let reader = store.get_url(&url).await.unwrap();
    assert_eq!(collect(reader.stream).await, b"public");
}

#[tokio::test]
async fn test_rejected_upload_carries_status() {
    let (addr, _fake) = start_fake().await;
    let store = RemoteObjectStore::new(config(addr)).unwrap();

    let err = store
        .put("reject_big.bin", "text/plain", byte_stream(b"x", 1))
        .await
        .unwrap_err();
    match &err {
        StorageError::WriteFailed { status, reason, .. } => {
            assert_eq!(*status, Some(413));
            assert!(reason.contains("Payload too large"));
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn test_failed_remove_is_retriable() {
    let (addr, fake) = start_fake().await;
    fake.insert("locked_a.txt", b"x");
    let store = RemoteObjectStore::new(config(addr)).unwrap();

    let err = store.remove("locked_a.txt").await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::DeleteFailed {
            status: Some(503),
            ..
        }
    ));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_wrong_api_key_is_rejected() {
    let (addr, _fake) = start_fake().await;
    let mut config = config(addr);
    config.api_key = "wrong".to_string();
    let store = RemoteObjectStore::new(config).unwrap();

    let err = store
        .put("k_a.txt", "text/plain", byte_stream(b"x", 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::WriteFailed {
            status: Some(401),
            ..
        }
    ));
}

#[tokio::test]
async fn test_timeout_is_retriable_without_status() {
    let (addr, _fake) = start_fake().await;
    let mut config = RemoteStoreConfig::new(format!("http://{addr}/slow"), BUCKET, API_KEY);
    config.timeout = Duration::from_millis(200);
    let store = RemoteObjectStore::new(config).unwrap();

    let err = store
        .put("k_a.txt", "text/plain", byte_stream(b"x", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::WriteFailed { status: None, .. }));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_unreachable_store_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = RemoteObjectStore::new(config(addr)).unwrap();
    let err = store.get("k_a.txt").await.unwrap_err();
    assert!(matches!(err, StorageError::ReadFailed { status: None, .. }));
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn test_listing_paginates_and_tolerates_entries() {
    for method in [ListMethod::Post, ListMethod::Get] {
        let (addr, fake) = start_fake().await;
        fake.insert("a_1.txt", b"1");
        fake.insert("b_str.txt", b"22");
        fake.insert("c_3.txt", b"333");
        fake.insert("d_str.txt", b"4444");
        fake.insert("e_5.txt", b"55555");

        let mut config = config(addr);
        config.page_size = 2;
        config.list_method = method;
        let store = RemoteObjectStore::new(config).unwrap();

        let listed: Vec<(String, u64)> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.key, e.size))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("a_1.txt".to_string(), 1),
                ("b_str.txt".to_string(), 2),
                ("c_3.txt".to_string(), 3),
                ("d_str.txt".to_string(), 4),
                ("e_5.txt".to_string(), 5),
                ("x_garbage".to_string(), 0),
            ],
            "{method:?}"
        );
    }
}

#[tokio::test]
async fn test_listing_stops_when_store_ignores_offset() {
    for method in [ListMethod::Post, ListMethod::Get] {
        let (addr, _fake) = start_fake().await;
        let mut config = config(addr);
        config.base_url = format!("http://{addr}/stuck");
        config.page_size = 2;
        config.list_method = method;
        let store = RemoteObjectStore::new(config).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), store.list())
            .await
            .expect("listing should terminate");
        let err = result.unwrap_err();
        assert!(
            matches!(err, StorageError::ReadFailed { ref reason, .. } if reason.contains("did not advance")),
            "{method:?}: {err:?}"
        );
    }
}

#[tokio::test]
async fn test_listing_short_stuck_page_is_deduplicated() {
    let (addr, _fake) = start_fake().await;
    let mut config = config(addr);
    config.base_url = format!("http://{addr}/stuck");
    config.page_size = 3;
    let store = RemoteObjectStore::new(config).unwrap();

    let keys: Vec<String> = store.list().await.unwrap().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["a_1.txt", "b_2.txt"]);
}

#[tokio::test]
async fn test_listing_reports_modified_time() {
    let (addr, fake) = start_fake().await;
    fake.insert("a_1.txt", b"1");
    let store = RemoteObjectStore::new(config(addr)).unwrap();

    let listed = store.list().await.unwrap();
    assert_eq!(
        listed[0].modified.unwrap().to_rfc3339(),
        "2024-01-01T00:00:00+00:00"
    );
}

// =============================================================================
// Through the storage service
// =============================================================================

#[tokio::test]
async fn test_service_over_remote_store() {
    let (addr, fake) = start_fake().await;
    let storage = StorageService::new(
        MemoryIndex::new(),
        RemoteObjectStore::new(config(addr)).unwrap(),
    );

    let descriptor = storage
        .upload(
            UploadRequest::new("report.pdf", byte_stream(b"%PDF-1.7", 3))
                .sender("a")
                .receiver("b"),
        )
        .await
        .unwrap();
    assert_eq!(descriptor.content_type, "application/pdf");
    assert_eq!(
        fake.content_type(&descriptor.storage_key).as_deref(),
        Some("application/pdf")
    );

    let url = storage.public_url(&descriptor).unwrap();
    assert!(url.ends_with(&format!("/object/public/upload/{}_report.pdf", descriptor.token)));

    let download = storage.download(&descriptor.token).await.unwrap();
    assert_eq!(collect(download.stream).await, b"%PDF-1.7");

    // The stored object was written before the descriptor and is not an orphan.
    assert!(storage.reconcile().await.unwrap().is_clean());

    storage.delete(&descriptor.token).await.unwrap();
    assert!(fake.content_type(&descriptor.storage_key).is_none());
    assert!(
        storage
            .delete(&descriptor.token)
            .await
            .unwrap_err()
            .is_not_found()
    );
}
