//! File relay HTTP handlers.

use std::io;

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use super::AppError;
use crate::storage::{FileDescriptor, StorageService, UploadRequest};

/// Client view of a stored file. The storage key is never exposed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileView {
    pub token: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FileView {
    fn new(storage: &StorageService, descriptor: FileDescriptor) -> Self {
        let url = storage.public_url(&descriptor);
        Self {
            token: descriptor.token,
            name: descriptor.name,
            size: descriptor.size,
            content_type: descriptor.content_type,
            sender: descriptor.sender,
            receiver: descriptor.receiver,
            created_at: descriptor.created_at,
            url,
        }
    }
}

/// Sender and receiver may be passed as query parameters instead of fields.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct UploadQuery {
    sender: Option<String>,
    receiver: Option<String>,
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// POST /api/file/upload - Stream a multipart `file` field into storage.
///
/// `sender` and `receiver` fields only apply when they come before `file`.
pub(crate) async fn upload(
    State(storage): State<StorageService>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<FileView>, AppError> {
    let mut sender = query.sender.and_then(non_blank);
    let mut receiver = query.receiver.and_then(non_blank);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "sender" | "receiver" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read {field_name}: {e}")))?;
                if field_name == "sender" {
                    sender = non_blank(value);
                } else {
                    receiver = non_blank(value);
                }
            },
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let stream = field
                    .map(|chunk| chunk.map_err(io::Error::other))
                    .boxed();

                let mut request = UploadRequest::new(file_name, stream);
                request.content_type = content_type;
                request.sender = sender.take();
                request.receiver = receiver.take();

                let descriptor = storage.upload(request).await?;
                return Ok(Json(FileView::new(&storage, descriptor)));
            },
            _ => {},
        }
    }

    Err(AppError::BadRequest(
        "No file uploaded. Field name must be 'file'.".to_string(),
    ))
}

/// GET /api/file/list - All files, newest first.
pub(crate) async fn list(
    State(storage): State<StorageService>,
) -> Result<Json<Vec<FileView>>, AppError> {
    let files = storage.list().await?;
    Ok(Json(
        files
            .into_iter()
            .map(|d| FileView::new(&storage, d))
            .collect(),
    ))
}

/// GET /api/file/inbox/{receiver} - Files addressed to one receiver.
pub(crate) async fn inbox(
    State(storage): State<StorageService>,
    Path(receiver): Path<String>,
) -> Result<Json<Vec<FileView>>, AppError> {
    let files = storage.list_for_receiver(&receiver).await?;
    Ok(Json(
        files
            .into_iter()
            .map(|d| FileView::new(&storage, d))
            .collect(),
    ))
}

/// GET /api/file/download/{token} - Stream the file as an attachment.
pub(crate) async fn download(
    State(storage): State<StorageService>,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let download = storage.download(&token).await?;
    let disposition = content_disposition(download.display_name());
    let size = download.descriptor.size;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        Body::from_stream(download.stream),
    )
        .into_response())
}

/// DELETE /api/file/{token} - Remove a file.
pub(crate) async fn delete(
    State(storage): State<StorageService>,
    Path(token): Path<String>,
) -> Result<StatusCode, AppError> {
    storage.delete(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health - Liveness probe.
pub(crate) async fn health(State(storage): State<StorageService>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "backend": storage.backend_name(),
    }))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 name.
pub(crate) fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let encoded = utf8_percent_encode(name, NON_ALPHANUMERIC);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
