//! Path-keyed blob descriptors and their JSON sidecar records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Sidecar record stored at `<metadata_root>/<key>.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarMetadata {
    /// Multipart field the blob arrived in.
    #[serde(default)]
    pub field_name: Option<String>,

    /// File name as the client sent it, before sanitizing.
    pub original_name: String,

    pub content_type: String,

    pub size: u64,

    pub uploaded_at: DateTime<Utc>,
}

/// Caller-supplied part of a sidecar; size and timestamp are filled in on write.
#[derive(Clone, Debug, Default)]
pub struct NewSidecar {
    pub field_name: Option<String>,
    pub original_name: String,
    pub content_type: Option<String>,
}

/// What the gateway reports about a stored blob.
///
/// Size and timestamps come from the filesystem; content type and original
/// name come from the sidecar and fall back to defaults when it is absent.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Quoted modification time in epoch milliseconds.
    pub etag: String,
    pub content_type: String,
    pub original_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SidecarMetadata>,
}

impl FileInfo {
    pub fn new(
        key: &str,
        size: u64,
        last_modified: DateTime<Utc>,
        sidecar: Option<SidecarMetadata>,
    ) -> Self {
        let content_type = sidecar
            .as_ref()
            .map(|m| m.content_type.clone())
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.into());
        let original_name = sidecar
            .as_ref()
            .map(|m| m.original_name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| key.to_string());

        Self {
            key: key.to_string(),
            size,
            last_modified,
            etag: format!("\"{}\"", last_modified.timestamp_millis()),
            content_type,
            original_name,
            metadata: sidecar,
        }
    }
}
