use crate::services::StorageError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// An HTTP-facing error: status, client message and an optional machine code.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("unhandled error: {:#}", err);
        AppError::internal("Internal server error")
    }
}

/// Malformed or oversized multipart bodies keep axum's status.
impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        tracing::debug!("multipart rejected: {}", err);
        AppError::new(err.status(), err.body_text())
    }
}

/// Client-caused failures keep their meaning; storage faults are logged with
/// full context and reported opaquely.
impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey => AppError::bad_request("Invalid key"),
            StorageError::NotFound(what) => {
                tracing::debug!("not found: {}", what);
                AppError::not_found("Resource not found").with_code("NOT_FOUND")
            }
            StorageError::FileMissing(what) => {
                tracing::warn!("indexed file {} has no blob on disk", what);
                AppError::not_found("Resource not found").with_code("FILE_MISSING")
            }
            StorageError::InvalidRequest { code, message } => {
                tracing::debug!("rejected request ({}): {}", code, message);
                AppError::bad_request("Incorrect request").with_code(code)
            }
            StorageError::Conflict(what) => {
                tracing::warn!("conflict: {}", what);
                AppError::new(StatusCode::CONFLICT, "Resource already exists")
                    .with_code("CONFLICT")
            }
            StorageError::Sqlx(err) => {
                tracing::error!("metadata store failure: {:?}", err);
                AppError::internal("Internal server error")
            }
            StorageError::Io(err) => {
                tracing::error!("filesystem failure: {:?}", err);
                AppError::internal("Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn storage_errors_map_to_client_or_server_statuses() {
        let cases = [
            (StorageError::InvalidKey, StatusCode::BAD_REQUEST, None),
            (
                StorageError::NotFound("x".into()),
                StatusCode::NOT_FOUND,
                Some("NOT_FOUND"),
            ),
            (
                StorageError::FileMissing("x".into()),
                StatusCode::NOT_FOUND,
                Some("FILE_MISSING"),
            ),
            (
                StorageError::InvalidRequest {
                    code: "MISSING_OWNER_ID",
                    message: "owner_id is required".into(),
                },
                StatusCode::BAD_REQUEST,
                Some("MISSING_OWNER_ID"),
            ),
            (
                StorageError::Conflict("x".into()),
                StatusCode::CONFLICT,
                Some("CONFLICT"),
            ),
            (
                StorageError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
            ),
        ];

        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, status);
            assert_eq!(app.code, code);
        }
    }

    #[test]
    fn invalid_key_message_is_stable() {
        let app: AppError = StorageError::InvalidKey.into();
        assert_eq!(app.message, "Invalid key");
    }

    #[test]
    fn faults_do_not_leak_details() {
        let app: AppError = StorageError::Io(io::Error::other("/srv/secret/path")).into();
        assert_eq!(app.message, "Internal server error");
    }
}
