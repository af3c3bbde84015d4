//! Error types for dandimirror-sync.
//!
//! [`SyncError`] aborts a whole pass. [`AssetSyncError`] is recorded against a
//! single asset and never stops its siblings.

use std::path::PathBuf;

use thiserror::Error;

use dandimirror_core::{AssetPath, CollectionId, ConfigError};

use crate::archive::ArchiveError;

/// Pass-level failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The mirror could not be created, opened, or its metadata step failed.
    #[error("setup failed at {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON error in the store's index or snapshot files.
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error while rendering or reading the metadata record.
    #[error("metadata YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Another pass holds the per-mirror lock.
    #[error("mirror for {collection} is busy (lock held on {lock})")]
    MirrorBusy {
        collection: CollectionId,
        lock: PathBuf,
    },

    /// The pass was cancelled before committing.
    #[error("sync cancelled before commit")]
    Cancelled,

    /// A snapshot or HEAD entry refers to something the store does not contain.
    #[error("corrupt store at {path}: {reason}")]
    CorruptStore { path: PathBuf, reason: String },
}

impl SyncError {
    /// Whether a later re-run can be expected to succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::MirrorBusy { .. } | SyncError::Cancelled)
    }
}

/// Cause of a per-asset failure.
#[derive(Debug, Error)]
pub enum AssetErrorKind {
    /// Materialized content does not match the archive's hash (or size).
    #[error("content mismatch: archive reports {expected}, mirror has {actual}")]
    Integrity { expected: String, actual: String },

    /// Filesystem failure while materializing, staging or deleting.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Network failure or bad response while downloading.
    #[error("download from {url} failed: {message}")]
    Download { url: String, message: String },

    /// The archive listed a path the mirror refuses to write.
    #[error("rejected path: {reason}")]
    Rejected { reason: String },

    /// The storage key could not be turned into a download URL.
    #[error("cannot resolve download URL for '{key}': {message}")]
    Origin { key: String, message: String },
}

/// A failure recorded against one asset path.
#[derive(Debug, Error)]
#[error("{path}: {kind}")]
pub struct AssetSyncError {
    pub path: AssetPath,
    #[source]
    pub kind: AssetErrorKind,
}

impl AssetSyncError {
    pub fn new(path: AssetPath, kind: AssetErrorKind) -> Self {
        Self { path, kind }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self.kind, AssetErrorKind::Integrity { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.kind, AssetErrorKind::Rejected { .. })
    }

    /// Integrity errors and rejections are deterministic; everything else is
    /// worth a re-run.
    pub fn is_transient(&self) -> bool {
        !(self.is_integrity() || self.is_rejected())
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Setup`].
pub(crate) fn setup_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Setup {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`AssetErrorKind::Io`].
pub(crate) fn asset_io(path: impl Into<PathBuf>, source: std::io::Error) -> AssetErrorKind {
    AssetErrorKind::Io {
        path: path.into(),
        source,
    }
}
