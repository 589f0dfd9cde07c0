//! Shared request state, built once in `main` and cloned into every handler.

use crate::services::{FileStore, IndexedFileStore, metadata_index::MetadataIndex};
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    /// Path-keyed backend behind `/api/storage`.
    pub files: Arc<dyn FileStore>,

    /// Identifier-indexed backend behind `/api/s3`.
    pub objects: Arc<dyn IndexedFileStore>,

    /// Index handle used by readiness probes.
    pub index: MetadataIndex,

    /// Directories the readiness probe writes a scratch file into.
    pub probe_dirs: Vec<PathBuf>,

    pub client_url: String,
}
