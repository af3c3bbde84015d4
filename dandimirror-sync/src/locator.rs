//! Object locator: maps an asset's storage key to a local object-cache path
//! or a download URL, and computes local file identities.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use reqwest::Url;
use sha2::{Digest, Sha256};
use thiserror::Error;

use dandimirror_core::Timestamp;

/// Identity of a file on disk used for weak change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalIdentity {
    pub size: u64,
    pub mtime: Timestamp,
}

/// Resolves storage keys against an optional locally mounted object store and
/// the archive's download base.
#[derive(Debug, Clone)]
pub struct ObjectLocator {
    cache_root: Option<PathBuf>,
    download_base: Url,
}

impl ObjectLocator {
    pub fn new(cache_root: Option<PathBuf>, download_base: Url) -> Self {
        Self {
            cache_root,
            download_base,
        }
    }

    pub fn cache_root(&self) -> Option<&Path> {
        self.cache_root.as_deref()
    }

    /// Path of the cached object for `storage_key`, if the cache holds it.
    ///
    /// Absolute-URL keys are looked up by their URL path, so a bucket replica
    /// laid out like the bucket itself is found.
    pub fn locate_cached(&self, storage_key: &str) -> Option<PathBuf> {
        let root = self.cache_root.as_ref()?;
        let relative = object_path(storage_key)?;
        let mut candidate = root.clone();
        for segment in relative.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return None;
            }
            candidate.push(segment);
        }
        candidate.is_file().then_some(candidate)
    }

    /// URL the object can be downloaded from.
    pub fn resolve_download_url(&self, storage_key: &str) -> Result<Url, UrlError> {
        if is_absolute_url(storage_key) {
            return Url::parse(storage_key).map_err(|e| UrlError::Parse(e.to_string()));
        }
        let relative = storage_key.trim_start_matches('/');
        if relative.is_empty() {
            return Err(UrlError::EmptyKey);
        }
        self.download_base
            .join(relative)
            .map_err(|e| UrlError::Parse(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum UrlError {
    #[error("storage key is empty")]
    EmptyKey,
    #[error("invalid URL: {0}")]
    Parse(String),
}

fn is_absolute_url(key: &str) -> bool {
    key.starts_with("http://") || key.starts_with("https://") || key.starts_with("s3://")
}

/// Object path relative to the cache root, without leading slash.
fn object_path(storage_key: &str) -> Option<String> {
    let path = if is_absolute_url(storage_key) {
        Url::parse(storage_key).ok()?.path().to_string()
    } else {
        storage_key.to_string()
    };
    let trimmed = path.trim_start_matches('/');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Stat `path` into a [`LocalIdentity`].
pub fn local_identity(path: &Path) -> std::io::Result<LocalIdentity> {
    let meta = std::fs::metadata(path)?;
    let mtime: DateTime<Utc> = meta.modified()?.into();
    Ok(LocalIdentity {
        size: meta.len(),
        mtime,
    })
}

/// Stream `path` through SHA-256 and return the lowercase hex digest.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 hex digest of an in-memory buffer.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
