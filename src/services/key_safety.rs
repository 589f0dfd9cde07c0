//! Mapping of untrusted client keys onto paths under a storage root.
//!
//! Callers percent-decode first ([`decode_key`]) and validate second, so an
//! encoded `..` never slips past the check.

use super::{StorageError, StorageResult};
use std::path::{Component, Path, PathBuf};

/// Longest sanitized upload name, in bytes. Leaves room for the key prefix
/// and the `.json` sidecar suffix under common filename limits.
const MAX_SANITIZED_NAME_LEN: usize = 200;

/// Validates keys against a fixed storage root.
#[derive(Clone, Debug)]
pub struct KeyGuard {
    root: PathBuf,
}

impl KeyGuard {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `key` and return it as a normalized path relative to the root.
    ///
    /// Rejects empty keys, anything containing `..`, absolute paths, control
    /// characters and backslashes, and keys that do not resolve to a strict
    /// descendant of the root (such as `.`).
    pub fn validate(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") {
            return Err(StorageError::InvalidKey);
        }
        if key.starts_with('/') || key.starts_with('\\') || Path::new(key).is_absolute() {
            return Err(StorageError::InvalidKey);
        }
        if key.chars().any(|c| c.is_control() || c == '\\') {
            return Err(StorageError::InvalidKey);
        }

        let mut relative = PathBuf::new();
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidKey);
                }
            }
        }

        let root = lexical_normalize(&self.root);
        let resolved = lexical_normalize(&self.root.join(&relative));
        if resolved == root || !resolved.starts_with(&root) {
            return Err(StorageError::InvalidKey);
        }

        Ok(relative)
    }

    /// Validate `key` and join it onto the root.
    pub fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self.root.join(self.validate(key)?))
    }
}

/// Percent-decode a client key. Decoding to invalid UTF-8 is an invalid key.
pub fn decode_key(raw: &str) -> StorageResult<String> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| StorageError::InvalidKey)
}

/// Make a client file name safe to embed in a storage key.
///
/// Strips every `..`, replaces path separators and control characters with
/// `_`, and caps the result at a filesystem-friendly length.
pub fn sanitize_upload_name(name: &str) -> String {
    let mut cleaned = name.to_string();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", "");
    }

    let mut out = String::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        let c = if c == '/' || c == '\\' || c.is_control() {
            '_'
        } else {
            c
        };
        if out.len() + c.len_utf8() > MAX_SANITIZED_NAME_LEN {
            break;
        }
        out.push(c);
    }

    if out.is_empty() { "file".into() } else { out }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
