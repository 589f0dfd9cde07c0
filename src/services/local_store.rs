//! LocalFileStore: path-keyed blobs on disk with a JSON sidecar per key.
//!
//! Layout beneath the storage directory:
//! - `files/<key>` holds the bytes
//! - `metadata/<key>.json` holds the [`SidecarMetadata`]
//!
//! Neither half is authoritative alone: a blob without a sidecar is served
//! with default metadata, and deleting tolerates either half being gone.

use super::{
    ByteStream, FileStore, StorageError, StorageResult,
    key_safety::{KeyGuard, sanitize_upload_name},
    write_stream,
};
use crate::models::file_info::{DEFAULT_CONTENT_TYPE, FileInfo, NewSidecar, SidecarMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::atomic::{AtomicI64, Ordering},
};
use tokio::fs::{self, File};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const TEMP_PREFIX: &str = ".tmp-";

pub struct LocalFileStore {
    files: KeyGuard,
    metadata: KeyGuard,
    /// Last millisecond stamp handed out by `make_key`.
    last_stamp: AtomicI64,
}

impl LocalFileStore {
    /// Store rooted at `storage_dir`, using its `files` and `metadata` subdirectories.
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        let root = storage_dir.into();
        Self {
            files: KeyGuard::new(root.join("files")),
            metadata: KeyGuard::new(root.join("metadata")),
            last_stamp: AtomicI64::new(0),
        }
    }

    pub fn files_root(&self) -> &Path {
        self.files.root()
    }

    /// Create both directory trees. Idempotent.
    pub async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(self.files.root()).await?;
        fs::create_dir_all(self.metadata.root()).await?;
        info!(
            "local storage ready (files: {}, metadata: {})",
            self.files.root().display(),
            self.metadata.root().display()
        );
        Ok(())
    }

    /// Strictly increasing millisecond stamp, never behind the wall clock.
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = match self.last_stamp.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |last| Some(now.max(last + 1)),
        ) {
            Ok(prev) | Err(prev) => prev,
        };
        now.max(previous + 1)
    }

    fn sidecar_path(&self, key: &str) -> StorageResult<PathBuf> {
        let mut name = self.metadata.validate(key)?.into_os_string();
        name.push(".json");
        Ok(self.metadata.root().join(name))
    }

    async fn describe(&self, key: &str, meta: &std::fs::Metadata) -> StorageResult<FileInfo> {
        let modified: DateTime<Utc> = meta.modified()?.into();
        let sidecar = read_sidecar(&self.sidecar_path(key)?).await;
        Ok(FileInfo::new(key, meta.len(), modified, sidecar))
    }

    async fn try_list(&self) -> io::Result<Vec<FileInfo>> {
        let mut entries = fs::read_dir(self.files.root()).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Some(key) = entry.file_name().to_str().map(str::to_string) else {
                debug!("skipping non UTF-8 entry {:?}", entry.file_name());
                continue;
            };
            // In-flight uploads, renamed into place once complete.
            if key.starts_with(TEMP_PREFIX) {
                continue;
            }

            // Entries may vanish between readdir and stat under concurrent deletes.
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(err) => {
                    debug!("skipping {}: {}", key, err);
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }

            match self.describe(&key, &meta).await {
                Ok(info) => files.push(info),
                Err(err) => debug!("skipping {}: {}", key, err),
            }
        }

        files.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.key.cmp(&a.key))
        });
        Ok(files)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    fn make_key(&self, original_name: &str) -> String {
        format!("{}-{}", self.next_stamp(), sanitize_upload_name(original_name))
    }

    /// Write the blob through a hidden temp file and rename it into place,
    /// then write the sidecar. A failed sidecar write is logged; the blob stays.
    async fn put(
        &self,
        key: &str,
        content: ByteStream<'_>,
        sidecar: NewSidecar,
    ) -> StorageResult<SidecarMetadata> {
        let file_path = self.files.resolve(key)?;
        let sidecar_path = self.sidecar_path(key)?;

        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::other("file path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));

        let size = match write_stream(&tmp_path, content).await {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        debug!("stored {} ({} bytes)", file_path.display(), size);

        let metadata = SidecarMetadata {
            field_name: sidecar.field_name,
            original_name: sidecar.original_name,
            content_type: sidecar
                .content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.into()),
            size,
            uploaded_at: Utc::now(),
        };
        if let Err(err) = write_sidecar(&sidecar_path, &metadata).await {
            warn!(
                "stored {} without sidecar metadata ({}): {}",
                key,
                sidecar_path.display(),
                err
            );
        }

        Ok(metadata)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<FileInfo>> {
        let file_path = self.files.resolve(key)?;
        let meta = match fs::metadata(&file_path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Io(err)),
        };
        if !meta.is_file() {
            return Ok(None);
        }
        self.describe(key, &meta).await.map(Some)
    }

    async fn open(&self, key: &str) -> StorageResult<(FileInfo, File)> {
        let info = self
            .get(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let file = File::open(self.files.resolve(key)?)
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Io(err)
                }
            })?;
        Ok((info, file))
    }

    /// List every blob, newest first.
    ///
    /// A listing failure degrades to an empty list; it is logged at `error`
    /// so it stays distinguishable from a genuinely empty store.
    async fn list(&self) -> Vec<FileInfo> {
        match self.try_list().await {
            Ok(files) => {
                debug!("listed {} files", files.len());
                files
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(
                    "files root {} does not exist; listing as empty",
                    self.files.root().display()
                );
                Vec::new()
            }
            Err(err) => {
                error!(
                    "listing failed under {}: {}",
                    self.files.root().display(),
                    err
                );
                Vec::new()
            }
        }
    }

    /// Best effort over both halves: only an invalid key is an error. Failed
    /// unlinks are logged and leave whatever could not be removed in place.
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let file_path = self.files.resolve(key)?;
        let sidecar_path = self.sidecar_path(key)?;

        remove_if_present(&file_path).await;
        remove_if_present(&sidecar_path).await;
        Ok(())
    }
}

async fn read_sidecar(path: &Path) -> Option<SidecarMetadata> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                debug!("could not read sidecar {}: {}", path.display(), err);
            }
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(meta) => Some(meta),
        Err(err) => {
            debug!("ignoring unreadable sidecar {}: {}", path.display(), err);
            None
        }
    }
}

async fn write_sidecar(path: &Path, metadata: &SidecarMetadata) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(metadata).map_err(io::Error::other)?;
    fs::write(path, body).await
}

async fn remove_if_present(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("removed {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("{} already missing", path.display())
        }
        Err(err) => warn!("failed to remove {}: {}", path.display(), err),
    }
}
