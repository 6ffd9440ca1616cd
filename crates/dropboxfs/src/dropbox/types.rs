//! Wire types for the Dropbox files API.
//!
//! Listing endpoints return a heterogeneous entry list discriminated by a
//! `.tag` field; [`Metadata`] models that union so callers can pattern-match
//! instead of poking at raw JSON.

use serde::{Deserialize, Serialize};

/// Metadata for a regular file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "path_display")]
    pub path: String,
    #[serde(default)]
    pub size: u64,
}

/// Metadata for a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "path_display")]
    pub path: String,
}

impl FolderMeta {
    /// The account root. Dropbox addresses it as the empty path, not `"/"`.
    pub fn root() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            path: String::new(),
        }
    }
}

/// A tombstone entry reported by the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedMeta {
    pub name: String,
    #[serde(rename = "path_display")]
    pub path: String,
}

/// One entry of a folder listing or change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
pub enum Metadata {
    File(FileMeta),
    Folder(FolderMeta),
    Deleted(DeletedMeta),
}

impl Metadata {
    pub fn path(&self) -> &str {
        match self {
            Metadata::File(m) => &m.path,
            Metadata::Folder(m) => &m.path,
            Metadata::Deleted(m) => &m.path,
        }
    }
}

/// One page of a folder listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPage {
    pub entries: Vec<Metadata>,
    pub cursor: String,
    pub has_more: bool,
}

/// Result of a long-poll round. `backoff` is a server request to stay away
/// for that many extra seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct LongpollResult {
    pub changes: bool,
    #[serde(default)]
    pub backoff: Option<u64>,
}
