//! StagedObjectStore: uploads are staged, relocated into a sharded tree and
//! then indexed.
//!
//! Layout beneath the storage directory:
//! - `s3_temp/` receives incoming uploads
//! - `s3_files/{id[0..2]}/{id}` holds committed blobs
//!
//! Commit order is relocate-then-insert. If the insert fails after the
//! rename, the blob is left in place without an index row and the failure is
//! logged with its path; no automatic rollback is attempted.

use super::{
    ByteStream, IndexedFileStore, StorageError, StorageResult, key_safety::KeyGuard,
    metadata_index::MetadataIndex, write_stream,
};
use crate::models::{
    file_info::DEFAULT_CONTENT_TYPE,
    file_record::{FileRecord, FileRecordSummary, ListFilesParams, NewUpload, StagedUpload},
};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs::{self, File};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_FILENAME_CHARS: usize = 255;
const MAX_MIME_TYPE_CHARS: usize = 100;
const MAX_TEMP_SUFFIX_CHARS: usize = 64;

pub struct StagedObjectStore {
    index: MetadataIndex,
    files: KeyGuard,
    temp_dir: PathBuf,
}

impl StagedObjectStore {
    pub fn new(index: MetadataIndex, storage_dir: impl Into<PathBuf>) -> Self {
        let root = storage_dir.into();
        Self {
            index,
            files: KeyGuard::new(root.join("s3_files")),
            temp_dir: root.join("s3_temp"),
        }
    }

    /// Create the permanent and temp directories. Both must live on the same
    /// filesystem so relocation is a plain rename.
    pub async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(self.files.root()).await?;
        fs::create_dir_all(&self.temp_dir).await?;
        info!(
            "staged storage ready (files: {}, temp: {})",
            self.files.root().display(),
            self.temp_dir.display()
        );
        Ok(())
    }

    pub fn files_root(&self) -> &Path {
        self.files.root()
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// A fresh identifier and its sharded relative path, `"{id[0..2]}/{id}"`.
    pub fn generate_location() -> (Uuid, String) {
        let file_id = Uuid::new_v4();
        let id = file_id.to_string();
        let path = format!("{}/{}", &id[..2], id);
        (file_id, path)
    }

    async fn relocate(&self, temp_path: &Path, relative: &str) -> StorageResult<PathBuf> {
        let target = self.files.resolve(relative)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(temp_path, &target).await?;
        debug!("moved {} to {}", temp_path.display(), target.display());
        Ok(target)
    }
}

#[async_trait]
impl IndexedFileStore for StagedObjectStore {
    async fn stage(
        &self,
        original_name: &str,
        content: ByteStream<'_>,
    ) -> StorageResult<StagedUpload> {
        fs::create_dir_all(&self.temp_dir).await?;
        let temp_path = self.temp_dir.join(format!(
            "upload-{}-{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple(),
            temp_suffix(original_name)
        ));

        match write_stream(&temp_path, content).await {
            Ok(size) => Ok(StagedUpload {
                temp_path,
                original_name: original_name.to_string(),
                size: i64::try_from(size).unwrap_or(i64::MAX),
            }),
            Err(err) => {
                remove_temp(&temp_path).await;
                Err(StorageError::Io(err))
            }
        }
    }

    async fn discard(&self, staged: &StagedUpload) {
        remove_temp(&staged.temp_path).await;
    }

    /// Commit a staged upload.
    ///
    /// 1. Reject uploads without an owner, removing the temp file.
    /// 2. Generate a new id and sharded path.
    /// 3. Rename the temp file into the permanent tree.
    /// 4. Insert the index row.
    async fn create_from_upload(&self, upload: NewUpload) -> StorageResult<FileRecordSummary> {
        if !upload.temp_path.starts_with(&self.temp_dir) {
            return Err(StorageError::InvalidRequest {
                code: "INVALID_TEMP_PATH",
                message: format!(
                    "{} is outside the staging area",
                    upload.temp_path.display()
                ),
            });
        }

        let owner_id = match upload
            .owner_id
            .as_deref()
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
        {
            Some(owner) => owner.to_string(),
            None => {
                remove_temp(&upload.temp_path).await;
                return Err(StorageError::InvalidRequest {
                    code: "MISSING_OWNER_ID",
                    message: "owner_id is required".into(),
                });
            }
        };

        let (file_id, path) = Self::generate_location();
        let target = match self.relocate(&upload.temp_path, &path).await {
            Ok(target) => target,
            Err(err) => {
                remove_temp(&upload.temp_path).await;
                return Err(err);
            }
        };

        let record = FileRecord {
            file_id,
            filename: display_filename(&upload.original_name),
            path,
            size: upload.size,
            mime_type: mime_type(upload.mime_type.as_deref()),
            created_at: Utc::now(),
            owner_id,
            task_id: upload.task_id.filter(|task| !task.is_empty()),
            is_deleted: false,
        };

        if let Err(err) = self.index.insert(&record).await {
            error!(
                "index insert failed for {}; blob stranded at {}: {}",
                file_id,
                target.display(),
                err
            );
            return Err(err);
        }

        info!(
            "stored {} for owner {} ({} bytes)",
            file_id, record.owner_id, record.size
        );
        Ok(FileRecordSummary::from(&record))
    }

    async fn list(&self, params: &ListFilesParams) -> StorageResult<Vec<FileRecordSummary>> {
        self.index.list(params).await
    }

    async fn fetch_by_id(&self, file_id: Uuid) -> StorageResult<Option<FileRecord>> {
        self.index.get_by_id(file_id).await
    }

    /// Open a live record's blob. Unknown and soft-deleted ids are `NotFound`;
    /// an indexed record whose blob is gone is `FileMissing`.
    async fn open_for_read(&self, file_id: Uuid) -> StorageResult<(FileRecord, File)> {
        let record = self
            .index
            .get_by_id(file_id)
            .await?
            .filter(|record| !record.is_deleted)
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?;

        let path = self.files.resolve(&record.path).map_err(|_| {
            warn!("record {} has an unusable path {:?}", file_id, record.path);
            StorageError::FileMissing(file_id.to_string())
        })?;

        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                warn!("record {} indexed but {} is missing", file_id, path.display());
                StorageError::FileMissing(file_id.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        if !file.metadata().await?.is_file() {
            return Err(StorageError::FileMissing(file_id.to_string()));
        }

        Ok((record, file))
    }

    /// Flip the soft-delete flag. The blob stays on disk.
    async fn soft_delete(&self, file_id: Uuid) -> StorageResult<bool> {
        let changed = self.index.soft_delete(file_id).await?;
        if changed {
            info!("soft-deleted {}", file_id);
        }
        Ok(changed)
    }
}

async fn remove_temp(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("removed temp file {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("could not remove temp file {}: {}", path.display(), err),
    }
}

/// Display name: separators replaced, capped at 255 characters.
fn display_filename(original: &str) -> String {
    let name = if original.is_empty() { "file" } else { original };
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .take(MAX_FILENAME_CHARS)
        .collect()
}

fn mime_type(raw: Option<&str>) -> String {
    raw.filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .chars()
        .take(MAX_MIME_TYPE_CHARS)
        .collect()
}

/// Readable tail for temp file names: basename restricted to `[A-Za-z0-9._-]`.
fn temp_suffix(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let suffix: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_TEMP_SUFFIX_CHARS)
        .collect();
    if suffix.is_empty() { "file".into() } else { suffix }
}
