//! Core data models for the file gateway.
//!
//! `file_info` describes blobs of the path-keyed store and their JSON
//! sidecars; `file_record` describes rows of the SQLite-indexed store and
//! maps onto the `files` table via `sqlx::FromRow`.

pub mod file_info;
pub mod file_record;
