//! Identifier-indexed file API mounted at `/api/s3`.
//!
//! The gateway in front of this service forwards the caller as `X-User-Id`;
//! it stands in for `owner_id` / `user_id` when the request does not name one.

use super::{field_stream, upload_content_type, upload_error};
use crate::{
    errors::AppError,
    models::file_record::{FileRecordSummary, ListFilesParams, NewUpload, StagedUpload},
    services::{IndexedFileStore, StorageError},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::info;
use uuid::Uuid;

const USER_ID_HEADER: &str = "x-user-id";

/// Query string of `GET /api/s3/files`. Numbers are parsed leniently: anything
/// that is not an integer falls back to the default.
#[derive(Debug, Default, Deserialize)]
pub struct ListFilesQuery {
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListFilesQuery {
    fn into_params(self, headers: &HeaderMap) -> ListFilesParams {
        ListFilesParams {
            owner_id: non_blank(self.user_id).or_else(|| header_user(headers)),
            task_id: non_blank(self.task_id),
            limit: self.limit.and_then(|v| v.trim().parse().ok()),
            offset: self.offset.and_then(|v| v.trim().parse().ok()),
        }
    }
}

/// `GET /api/s3/files?user_id&task_id&limit&offset`
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<FileRecordSummary>>, AppError> {
    let params = query.into_params(&headers);
    Ok(Json(state.objects.list(&params).await?))
}

/// `POST /api/s3/files` with multipart fields `file`, `owner_id` and `task_id`.
///
/// The file is staged as soon as its part arrives; text fields may come before
/// or after it. A staged file that is not committed is discarded.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = match read_upload_form(state.objects.as_ref(), multipart).await {
        Ok(form) => form,
        Err((staged, err)) => {
            if let Some(staged) = staged {
                state.objects.discard(&staged).await;
            }
            return Err(err);
        }
    };

    let Some((staged, mime_type)) = form.file else {
        return Err(AppError::bad_request("Incorrect request").with_code("NO_FILE"));
    };
    let owner_id = non_blank(form.owner_id).or_else(|| header_user(&headers));
    let upload = NewUpload::from_staged(staged, mime_type, owner_id, form.task_id);

    let summary = state.objects.create_from_upload(upload).await?;
    info!(
        "stored {} for owner {} ({} bytes)",
        summary.file_id, summary.owner_id, summary.size
    );
    Ok((StatusCode::CREATED, Json(summary)))
}

/// `GET /api/s3/files/{file_id}` streams the bytes with the recorded type.
pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    let file_id = parse_file_id(&file_id)?;
    let (record, file) = state.objects.open_for_read(file_id).await?;
    let length = file.metadata().await.map_err(StorageError::from)?.len();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&format!(
        "inline; filename=\"{}\"",
        urlencoding::encode(&record.filename)
    )) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `DELETE /api/s3/files/{file_id}` soft-deletes the record. 204 on success.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let file_id = parse_file_id(&file_id)?;
    if state.objects.fetch_by_id(file_id).await?.is_none() {
        return Err(StorageError::NotFound(file_id.to_string()).into());
    }
    if !state.objects.soft_delete(file_id).await? {
        return Err(StorageError::NotFound(file_id.to_string()).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Default)]
struct UploadForm {
    file: Option<(StagedUpload, Option<String>)>,
    owner_id: Option<String>,
    task_id: Option<String>,
}

type FormError = (Option<StagedUpload>, AppError);

/// Drain the multipart body. On failure the already-staged file, if any, is
/// handed back so the caller can discard it.
async fn read_upload_form(
    objects: &dyn IndexedFileStore,
    mut multipart: Multipart,
) -> Result<UploadForm, FormError> {
    let mut form = UploadForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(form),
            Err(err) => return Err((form.file.map(|(staged, _)| staged), err.into())),
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") if form.file.is_none() && field.file_name().is_some() => {
                let original_name = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .unwrap_or("file")
                    .to_string();
                let mime_type = upload_content_type(field.content_type(), &original_name);
                match objects.stage(&original_name, field_stream(field)).await {
                    Ok(staged) => form.file = Some((staged, mime_type)),
                    Err(err) => return Err((None, upload_error(err))),
                }
            }
            Some(text @ ("owner_id" | "task_id")) => {
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(err) => return Err((form.file.map(|(staged, _)| staged), err.into())),
                };
                if text == "owner_id" {
                    form.owner_id = Some(value);
                } else {
                    form.task_id = Some(value);
                }
            }
            _ => {}
        }
    }
}

fn parse_file_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| StorageError::NotFound(raw.to_string()).into())
}

fn header_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .and_then(|v| non_blank(Some(v)))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
