//! MetadataIndex: durable record of indexed files, backed by SQLite.
//!
//! Every mutation is a single statement: a record is written once on insert
//! and at most flipped once by soft delete, so no multi-row transactions are
//! needed. Rows are never physically removed here.

use super::{StorageError, StorageResult};
use crate::models::file_record::{FileRecord, FileRecordSummary, ListFilesParams};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct MetadataIndex {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Idempotent, safe on every startup.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("applying {} schema statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Insert a new record. A colliding `file_id` or `path` is a `Conflict`,
    /// never an overwrite.
    pub async fn insert(&self, record: &FileRecord) -> StorageResult<()> {
        let result = sqlx::query(
            "INSERT INTO files (
                file_id, filename, path, size, mime_type,
                created_at, owner_id, task_id, is_deleted
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.file_id)
        .bind(&record.filename)
        .bind(&record.path)
        .bind(record.size)
        .bind(&record.mime_type)
        .bind(record.created_at)
        .bind(&record.owner_id)
        .bind(record.task_id.as_deref())
        .bind(record.is_deleted)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StorageError::Conflict(format!(
                "file {} at {}",
                record.file_id, record.path
            ))),
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    /// One page of live records, newest first.
    ///
    /// Filters are equality matches; blank filters are ignored. Paging past
    /// the end yields an empty page.
    pub async fn list(&self, params: &ListFilesParams) -> StorageResult<Vec<FileRecordSummary>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT file_id, filename, created_at, size, owner_id, task_id \
             FROM files WHERE is_deleted = 0",
        );

        if let Some(owner) = params.owner_filter() {
            builder.push(" AND owner_id = ");
            builder.push_bind(owner.to_string());
        }
        if let Some(task) = params.task_filter() {
            builder.push(" AND task_id = ");
            builder.push_bind(task.to_string());
        }

        builder.push(" ORDER BY created_at DESC, file_id DESC LIMIT ");
        builder.push_bind(params.effective_limit());
        builder.push(" OFFSET ");
        builder.push_bind(params.effective_offset());

        let rows: Vec<FileRecordSummary> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    /// Fetch a record by id, including soft-deleted ones.
    pub async fn get_by_id(&self, file_id: Uuid) -> StorageResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT file_id, filename, path, size, mime_type,
                    created_at, owner_id, task_id, is_deleted
             FROM files WHERE file_id = ?",
        )
        .bind(file_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Mark a record deleted. Returns whether any row matched `file_id`.
    pub async fn soft_delete(&self, file_id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE files SET is_deleted = 1 WHERE file_id = ?")
            .bind(file_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lightweight connectivity check used by readiness probes.
    pub async fn ping(&self) -> StorageResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        debug!("sqlite ping returned {}", value);
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique or primary key violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.is_unique_violation()
                || db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// In-memory index with the schema applied, shared by the service tests.
#[cfg(test)]
pub(crate) async fn test_index() -> MetadataIndex {
    use sqlx::sqlite::SqlitePoolOptions;

    // One connection: every new `:memory:` connection is a separate database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    let index = MetadataIndex::new(Arc::new(pool));
    index.migrate().await.expect("schema");
    index
}
