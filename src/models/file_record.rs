//! Records of the identifier-indexed store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;
use uuid::Uuid;

const DEFAULT_PAGE_LIMIT: i64 = 100;
const MAX_PAGE_LIMIT: i64 = 1000;

/// A stored file as indexed in the `files` table.
///
/// The row holds everything needed to interpret the bytes; the bytes live on
/// disk at `path`, relative to the permanent storage root.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Server-generated identifier, never chosen by the client.
    pub file_id: Uuid,

    /// Display name, sanitized and length-capped.
    pub filename: String,

    /// Sharded storage-relative location. Set once at creation.
    pub path: String,

    pub size: i64,

    pub mime_type: String,

    pub created_at: DateTime<Utc>,

    pub owner_id: String,

    /// Optional grouping key.
    pub task_id: Option<String>,

    /// Soft-delete flag; deleted rows stay in the table.
    pub is_deleted: bool,
}

/// The subset of a record returned by listings and uploads.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecordSummary {
    pub file_id: Uuid,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub size: i64,
    pub owner_id: String,
    pub task_id: Option<String>,
}

impl From<&FileRecord> for FileRecordSummary {
    fn from(record: &FileRecord) -> Self {
        Self {
            file_id: record.file_id,
            filename: record.filename.clone(),
            created_at: record.created_at,
            size: record.size,
            owner_id: record.owner_id.clone(),
            task_id: record.task_id.clone(),
        }
    }
}

/// Filters and paging for indexed listings.
#[derive(Clone, Debug, Default)]
pub struct ListFilesParams {
    pub owner_id: Option<String>,
    pub task_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListFilesParams {
    /// Page size: 100 when absent or zero, otherwise clamped to `1..=1000`.
    pub fn effective_limit(&self) -> i64 {
        match self.limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(limit) => limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn owner_filter(&self) -> Option<&str> {
        self.owner_id.as_deref().filter(|v| !v.is_empty())
    }

    pub fn task_filter(&self) -> Option<&str> {
        self.task_id.as_deref().filter(|v| !v.is_empty())
    }
}

/// An upload sitting in the temp area.
#[derive(Clone, Debug)]
pub struct StagedUpload {
    pub temp_path: PathBuf,
    pub original_name: String,
    pub size: i64,
}

/// Everything needed to commit a staged upload.
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub temp_path: PathBuf,
    pub original_name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    /// Must resolve to a non-blank value or the upload is rejected.
    pub owner_id: Option<String>,
    pub task_id: Option<String>,
}

impl NewUpload {
    pub fn from_staged(
        staged: StagedUpload,
        mime_type: Option<String>,
        owner_id: Option<String>,
        task_id: Option<String>,
    ) -> Self {
        Self {
            temp_path: staged.temp_path,
            original_name: staged.original_name,
            size: staged.size,
            mime_type,
            owner_id,
            task_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(limit: Option<i64>, offset: Option<i64>) -> ListFilesParams {
        ListFilesParams {
            limit,
            offset,
            ..Default::default()
        }
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(params(None, None).effective_limit(), 100);
        assert_eq!(params(Some(0), None).effective_limit(), 100);
        assert_eq!(params(Some(-5), None).effective_limit(), 1);
        assert_eq!(params(Some(50), None).effective_limit(), 50);
        assert_eq!(params(Some(5000), None).effective_limit(), 1000);
    }

    #[test]
    fn offset_never_negative() {
        assert_eq!(params(None, None).effective_offset(), 0);
        assert_eq!(params(None, Some(-3)).effective_offset(), 0);
        assert_eq!(params(None, Some(7)).effective_offset(), 7);
    }

    #[test]
    fn blank_filters_are_ignored() {
        let p = ListFilesParams {
            owner_id: Some(String::new()),
            task_id: Some("t1".into()),
            ..Default::default()
        };
        assert_eq!(p.owner_filter(), None);
        assert_eq!(p.task_filter(), Some("t1"));
    }
}
