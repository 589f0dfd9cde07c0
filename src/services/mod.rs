//! Storage backends and the capability traits the HTTP layer is written against.
//!
//! Two strategies live side by side:
//! - [`local_store::LocalFileStore`] keeps blobs under client-visible keys with a
//!   JSON sidecar per key (`FileStore`).
//! - [`staged_store::StagedObjectStore`] stages uploads in a temp area, moves them
//!   into a sharded tree and indexes them in SQLite (`IndexedFileStore`).
//!
//! Both are constructed once in `main` and handed to the router as trait objects.

pub mod key_safety;
pub mod local_store;
pub mod metadata_index;
pub mod staged_store;

use crate::models::{
    file_info::{FileInfo, NewSidecar, SidecarMetadata},
    file_record::{FileRecord, FileRecordSummary, ListFilesParams, NewUpload, StagedUpload},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::{io, path::Path};
use thiserror::Error;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use uuid::Uuid;

/// Incoming upload body, already adapted to `io::Error` by the caller.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid key")]
    InvalidKey,
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("blob for `{0}` is missing on disk")]
    FileMissing(String),
    #[error("invalid request ({code}): {message}")]
    InvalidRequest { code: &'static str, message: String },
    #[error("`{0}` already exists")]
    Conflict(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Path-keyed storage: the key the client sees is the on-disk name.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Derive a fresh, collision-free key from a client-supplied file name.
    fn make_key(&self, original_name: &str) -> String;

    /// Write `content` under `key` and record its sidecar metadata.
    async fn put(
        &self,
        key: &str,
        content: ByteStream<'_>,
        sidecar: NewSidecar,
    ) -> StorageResult<SidecarMetadata>;

    /// Stat a stored blob. `Ok(None)` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<FileInfo>>;

    /// Open a stored blob for streaming out.
    async fn open(&self, key: &str) -> StorageResult<(FileInfo, File)>;

    /// Every stored blob, newest first.
    async fn list(&self) -> Vec<FileInfo>;

    /// Remove blob and sidecar. Already-missing halves are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Identifier-indexed storage with staged uploads and soft delete.
#[async_trait]
pub trait IndexedFileStore: Send + Sync {
    /// Write an incoming upload into the temp area.
    async fn stage(
        &self,
        original_name: &str,
        content: ByteStream<'_>,
    ) -> StorageResult<StagedUpload>;

    /// Best-effort removal of a staged upload that will not be committed.
    async fn discard(&self, staged: &StagedUpload);

    async fn create_from_upload(&self, upload: NewUpload) -> StorageResult<FileRecordSummary>;

    async fn list(&self, params: &ListFilesParams) -> StorageResult<Vec<FileRecordSummary>>;

    /// Look a record up regardless of its soft-delete state.
    async fn fetch_by_id(&self, file_id: Uuid) -> StorageResult<Option<FileRecord>>;

    async fn open_for_read(&self, file_id: Uuid) -> StorageResult<(FileRecord, File)>;

    async fn soft_delete(&self, file_id: Uuid) -> StorageResult<bool>;
}

/// Stream `content` into a new file at `path`, fsync it, and return the byte
/// count. The caller removes `path` if this fails.
pub(crate) async fn write_stream(path: &Path, mut content: ByteStream<'_>) -> io::Result<u64> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;

    let mut size: u64 = 0;
    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(size)
}
