//! Domain types shared by the archive client and the sync engine.
//!
//! Asset paths are POSIX-relative strings as reported by the archive; they are
//! only turned into filesystem paths through [`AssetPath::to_fs_path`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AssetPathError;

/// UTC timestamp used for asset modification times and snapshot authorship.
pub type Timestamp = DateTime<Utc>;

/// Opaque key/value map as delivered by the archive.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of one archive-level collection (a Dandiset), e.g. `000027`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub String);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CollectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CollectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A validated POSIX relative path inside a collection.
///
/// A single leading `/` is stripped. Empty segments, `.`/`..` segments and
/// backslashes are rejected. Comparison is byte-wise and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetPath(String);

impl AssetPath {
    pub fn parse(raw: &str) -> Result<Self, AssetPathError> {
        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        if trimmed.is_empty() {
            return Err(AssetPathError::Empty);
        }
        if trimmed.contains('\\') {
            return Err(AssetPathError::Backslash(raw.to_string()));
        }
        for segment in trimmed.split('/') {
            match segment {
                "" => return Err(AssetPathError::EmptySegment(raw.to_string())),
                "." | ".." => return Err(AssetPathError::Relative(raw.to_string())),
                _ => {}
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First path segment (the top-level entry of the mirror this path lives under).
    pub fn top_level(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Join onto a mirror root using native separators.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.0.split('/') {
            path.push(segment);
        }
        path
    }

    /// Build from a path relative to `root`, e.g. while walking a working tree.
    pub fn from_fs_path(root: &Path, path: &Path) -> Result<Self, AssetPathError> {
        let relative = path
            .strip_prefix(root)
            .map_err(|_| AssetPathError::OutsideRoot(path.display().to_string()))?;
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                std::path::Component::Normal(name) => match name.to_str() {
                    Some(name) => parts.push(name),
                    None => return Err(AssetPathError::NotUtf8(path.display().to_string())),
                },
                _ => return Err(AssetPathError::OutsideRoot(path.display().to_string())),
            }
        }
        Self::parse(&parts.join("/"))
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AssetPath {
    type Err = AssetPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AssetPath {
    type Error = AssetPathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AssetPath> for String {
    fn from(p: AssetPath) -> Self {
        p.0
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One file entry of a collection as known to the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub path: AssetPath,
    /// Object-store key or absolute URL of the backing blob.
    pub storage_key: String,
    /// Lowercase SHA-256 hex digest, when the archive reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<Timestamp>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One entry of a mirror's working-tree inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    pub path: AssetPath,
    /// Content key assigned by the versioned store, if the file is tracked and unmodified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strong_key: Option<String>,
    pub size: u64,
    pub mtime: Timestamp,
}

/// The collection's top-level descriptive record. Replaced wholesale on every sync.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord(pub Metadata);

impl MetadataRecord {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Identifier embedded in the record, accepting `DANDI:`-prefixed values.
    pub fn identifier(&self) -> Option<String> {
        let raw = self.0.get("identifier")?.as_str()?;
        Some(raw.strip_prefix("DANDI:").unwrap_or(raw).to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
