//! Path-keyed file API mounted at `/api/storage`.
//!
//! Keys arrive percent-encoded in the path and are decoded once more before
//! they reach the store, so `..%2F` style keys are caught by the key guard.

use super::{content_disposition, field_stream, upload_content_type, upload_error};
use crate::{
    errors::AppError,
    models::file_info::{FileInfo, NewSidecar, SidecarMetadata},
    services::{FileStore, StorageError, key_safety::decode_key},
    state::AppState,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Multipart, Path, State, multipart::Field},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

const MAX_FILES_PER_REQUEST: usize = 10;
const BUCKET_NAME: &str = "local-storage";

/// Upload receipt returned for every stored file.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub key: String,
    pub location: String,
    pub bucket: &'static str,
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

impl StoredFile {
    fn new(key: String, metadata: SidecarMetadata) -> Self {
        Self {
            location: format!("/api/storage/files/{}", key),
            key,
            bucket: BUCKET_NAME,
            original_name: metadata.original_name,
            size: metadata.size,
            content_type: metadata.content_type,
            uploaded_at: metadata.uploaded_at,
        }
    }
}

#[derive(Deserialize, Default)]
struct DeleteManyRequest {
    #[serde(default)]
    keys: Vec<String>,
}

/// `POST /api/storage/upload` with one multipart file field named `file`.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") || field.file_name().is_none() {
            continue;
        }

        let file = store_field(state.files.as_ref(), field).await?;
        info!("uploaded {} ({} bytes)", file.key, file.size);
        return Ok(Json(json!({
            "success": true,
            "message": "File uploaded successfully",
            "file": file,
        })));
    }

    Err(AppError::bad_request("No file uploaded"))
}

/// `POST /api/storage/upload-multiple` with up to ten fields named `files`.
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut files: Vec<StoredFile> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                rollback(state.files.as_ref(), &files).await;
                return Err(err.into());
            }
        };
        if field.name() != Some("files") || field.file_name().is_none() {
            continue;
        }
        if files.len() == MAX_FILES_PER_REQUEST {
            rollback(state.files.as_ref(), &files).await;
            return Err(AppError::bad_request(format!(
                "Too many files, at most {} per request",
                MAX_FILES_PER_REQUEST
            )));
        }

        match store_field(state.files.as_ref(), field).await {
            Ok(file) => files.push(file),
            Err(err) => {
                rollback(state.files.as_ref(), &files).await;
                return Err(err);
            }
        }
    }

    if files.is_empty() {
        return Err(AppError::bad_request("No files uploaded"));
    }

    info!("uploaded {} file(s)", files.len());
    Ok(Json(json!({
        "success": true,
        "message": format!("{} file(s) uploaded successfully", files.len()),
        "files": files,
    })))
}

/// `GET /api/storage/files`
pub async fn list_files(State(state): State<AppState>) -> Json<Value> {
    let files = state.files.list().await;
    Json(json!({
        "success": true,
        "count": files.len(),
        "files": files,
    }))
}

/// `GET /api/storage/files/{key}`
pub async fn get_file_info(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, AppError> {
    let key = decode_key(&key)?;
    let file = state.files.get(&key).await?.ok_or_else(file_not_found)?;
    Ok(Json(json!({ "success": true, "file": file })))
}

/// `GET /api/storage/files/{key}/view` streams the bytes inline.
pub async fn view_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let key = decode_key(&key)?;
    let (info, file) = state.files.open(&key).await.map_err(missing_as_not_found)?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &info);
    Ok(response)
}

/// `GET /api/storage/download/{key}` streams the bytes as an attachment named
/// after the original upload.
pub async fn download_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let key = decode_key(&key)?;
    let (info, file) = state.files.open(&key).await.map_err(missing_as_not_found)?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    set_file_headers(headers, &info);
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition("attachment", &info.original_name),
    );
    Ok(response)
}

/// `GET /api/storage/preview/{key}` returns a non-expiring URL to the inline view.
pub async fn preview_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let key = decode_key(&key)?;
    if state.files.get(&key).await?.is_none() {
        return Err(file_not_found());
    }

    Ok(Json(json!({
        "success": true,
        "url": preview_url(&headers, &key),
        "expiresIn": null,
    })))
}

/// `DELETE /api/storage/files/{key}`. Deleting an absent key succeeds.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, AppError> {
    let key = decode_key(&key)?;
    state.files.delete(&key).await?;
    info!("deleted {}", key);
    Ok(Json(json!({
        "success": true,
        "message": "File deleted successfully",
        "key": key,
    })))
}

/// `DELETE /api/storage/files` with a JSON body `{"keys": [...]}`.
///
/// Each key is handled on its own; failures are reported per key.
pub async fn delete_files(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let request: DeleteManyRequest = serde_json::from_slice(&body).unwrap_or_default();
    if request.keys.is_empty() {
        return Err(AppError::bad_request("No keys provided"));
    }

    let mut deleted = Vec::new();
    let mut errors = Vec::new();
    for raw in request.keys {
        let result = match decode_key(&raw) {
            Ok(key) => state.files.delete(&key).await.map(|()| key),
            Err(err) => Err(err),
        };
        match result {
            Ok(key) => deleted.push(json!({ "key": key })),
            Err(StorageError::InvalidKey) => {
                errors.push(json!({ "key": raw, "error": "Invalid key" }))
            }
            Err(err) => {
                warn!("bulk delete of {} failed: {}", raw, err);
                errors.push(json!({ "key": raw, "error": "Failed to delete file" }));
            }
        }
    }

    let mut body = json!({
        "success": true,
        "message": format!("{} file(s) deleted successfully", deleted.len()),
        "deleted": deleted,
    });
    if !errors.is_empty() {
        body["errors"] = json!(errors);
    }
    Ok(Json(body))
}

async fn store_field(files: &dyn FileStore, field: Field<'_>) -> Result<StoredFile, AppError> {
    let field_name = field.name().map(str::to_string);
    let original_name = field
        .file_name()
        .filter(|name| !name.is_empty())
        .unwrap_or("file")
        .to_string();
    let content_type = upload_content_type(field.content_type(), &original_name);

    let key = files.make_key(&original_name);
    let metadata = files
        .put(
            &key,
            field_stream(field),
            NewSidecar {
                field_name,
                original_name,
                content_type,
            },
        )
        .await
        .map_err(upload_error)?;

    Ok(StoredFile::new(key, metadata))
}

async fn rollback(files: &dyn FileStore, stored: &[StoredFile]) {
    for file in stored {
        if let Err(err) = files.delete(&file.key).await {
            warn!("could not roll back upload {}: {}", file.key, err);
        }
    }
}

fn file_not_found() -> AppError {
    AppError::not_found("File not found")
}

fn missing_as_not_found(err: StorageError) -> AppError {
    match err {
        StorageError::NotFound(_) => file_not_found(),
        other => other.into(),
    }
}

fn set_file_headers(headers: &mut HeaderMap, info: &FileInfo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.size));
    if let Ok(value) = HeaderValue::from_str(&info.etag) {
        headers.insert(header::ETAG, value);
    }
    let last_modified = info
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// Absolute URL of the inline view, built from the request's own host.
fn preview_url(headers: &HeaderMap, key: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!(
        "{}://{}/api/storage/files/{}/view",
        scheme,
        host,
        urlencoding::encode(key)
    )
}
