//! HTTP handlers. Each module maps one surface onto the storage traits; bodies
//! are streamed in and out, never buffered whole.

pub mod health_handlers;
pub mod s3_handlers;
pub mod storage_handlers;

use crate::{
    errors::AppError,
    services::{ByteStream, StorageError},
};
use axum::{
    extract::multipart::{Field, MultipartError},
    http::HeaderValue,
};
use futures::StreamExt;
use std::io;

/// Adapt a multipart field to the byte stream the stores consume.
pub(crate) fn field_stream<'a>(field: Field<'a>) -> ByteStream<'a> {
    field.map(|chunk| chunk.map_err(io::Error::other)).boxed()
}

/// Content type declared by the client, else guessed from the file name.
pub(crate) fn upload_content_type(declared: Option<&str>, file_name: &str) -> Option<String> {
    declared
        .filter(|ct| !ct.is_empty())
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(file_name).first_raw().map(str::to_string))
}

/// Map a failed upload to a response. Errors raised by the multipart body
/// itself (size limit, truncated stream) keep their client status.
pub(crate) fn upload_error(err: StorageError) -> AppError {
    match err {
        StorageError::Io(io_err)
            if io_err
                .get_ref()
                .is_some_and(|inner| inner.is::<MultipartError>()) =>
        {
            match io_err.into_inner().map(|inner| inner.downcast::<MultipartError>()) {
                Some(Ok(multipart)) => AppError::from(*multipart),
                _ => AppError::internal("Internal server error"),
            }
        }
        other => other.into(),
    }
}

/// `Content-Disposition` with an ASCII fallback name and the exact name in
/// `filename*`.
pub(crate) fn content_disposition(disposition: &str, filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    let value = format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        disposition,
        fallback,
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
