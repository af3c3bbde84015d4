//! Content resolver: materialize one asset's bytes into the mirror.
//!
//! Content lands in `.mirror/tmp/<sha256(path)>.part`, is hashed and verified
//! there, gets the archive's mtime, and only then is renamed over the working
//! tree path. A failed verification leaves the previous file in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;
use futures::StreamExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use dandimirror_core::{AssetPath, RemoteAsset};

use crate::cancel::CancelToken;
use crate::error::{asset_io, AssetErrorKind, AssetSyncError};
use crate::fetch::Fetcher;
use crate::fsutil;
use crate::locator::{hash_bytes, hash_file, ObjectLocator};

/// Where materialized content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Cache,
    Download,
}

/// Confidence attached to a synced asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    /// Recomputed SHA-256 equals the archive's hash.
    Strong,
    /// No archive hash; only the size was checked.
    Weak,
}

/// An asset whose content now sits at its working-tree path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub path: AssetPath,
    /// SHA-256 of the materialized content.
    pub key: String,
    pub source: ContentSource,
    pub verification: Verification,
    /// Provenance to register on the staged file.
    pub origin: String,
}

#[derive(Debug)]
pub enum ResolveError {
    Asset(AssetSyncError),
    Cancelled,
}

impl From<AssetSyncError> for ResolveError {
    fn from(err: AssetSyncError) -> Self {
        ResolveError::Asset(err)
    }
}

pub struct ContentResolver {
    locator: ObjectLocator,
    fetcher: Arc<dyn Fetcher>,
    mirror_root: PathBuf,
    staging_dir: PathBuf,
}

impl ContentResolver {
    pub fn new(
        locator: ObjectLocator,
        fetcher: Arc<dyn Fetcher>,
        mirror_root: PathBuf,
        staging_dir: PathBuf,
    ) -> Self {
        Self {
            locator,
            fetcher,
            mirror_root,
            staging_dir,
        }
    }

    /// Materialize `asset`, preferring the local object cache over a download.
    ///
    /// Exactly one of the two sources is tried.
    pub async fn resolve(
        &self,
        asset: &RemoteAsset,
        cancel: &CancelToken,
    ) -> Result<Materialized, ResolveError> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let fail = |kind: AssetErrorKind| ResolveError::Asset(AssetSyncError::new(asset.path.clone(), kind));
        let part = self
            .staging_dir
            .join(format!("{}.part", hash_bytes(asset.path.as_str().as_bytes())));
        let url = self.locator.resolve_download_url(&asset.storage_key);

        let fetched = match self.locator.locate_cached(&asset.storage_key) {
            Some(cached) => {
                tracing::info!(path = %asset.path, source = %cached.display(), "copying from object cache");
                self.copy_cached(&cached, &part, cancel).await
            }
            None => {
                let url = url.as_ref().map_err(|e| {
                    fail(AssetErrorKind::Origin {
                        key: asset.storage_key.clone(),
                        message: e.to_string(),
                    })
                })?;
                tracing::info!(path = %asset.path, url = %url, "downloading");
                self.download(url, &part, cancel).await
            }
        };
        let (key, size, source) = match fetched {
            Ok(done) => done,
            Err(err) => {
                let _ = fsutil::remove_if_exists(&part);
                return Err(match err {
                    Failure::Cancelled => ResolveError::Cancelled,
                    Failure::Kind(kind) => fail(kind),
                });
            }
        };

        let verification = match verify(asset, &key, size) {
            Ok(v) => v,
            Err(kind) => {
                let _ = fsutil::remove_if_exists(&part);
                tracing::error!(path = %asset.path, error = %kind, "integrity check failed");
                return Err(fail(kind));
            }
        };

        if let Some(modified) = asset.modified_at {
            let mtime = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
            if let Err(e) = filetime::set_file_mtime(&part, mtime) {
                let _ = fsutil::remove_if_exists(&part);
                return Err(fail(asset_io(&part, e)));
            }
        }

        let dest = asset.path.to_fs_path(&self.mirror_root);
        if let Err(e) = place(&part, &dest) {
            let _ = fsutil::remove_if_exists(&part);
            return Err(fail(asset_io(&dest, e)));
        }

        let origin = match url {
            Ok(url) => url.to_string(),
            Err(_) => asset.storage_key.clone(),
        };
        Ok(Materialized {
            path: asset.path.clone(),
            key,
            source,
            verification,
            origin,
        })
    }

    async fn copy_cached(
        &self,
        cached: &Path,
        part: &Path,
        cancel: &CancelToken,
    ) -> Result<(String, u64, ContentSource), Failure> {
        let src = cached.to_path_buf();
        let dest = part.to_path_buf();
        let mut work = tokio::task::spawn_blocking(move || -> std::io::Result<(String, u64)> {
            let method = fsutil::clone_or_copy(&src, &dest).map_err(|e| annotate(&src, e))?;
            tracing::debug!(?method, "duplicated cached object");
            let size = std::fs::metadata(&dest)?.len();
            Ok((hash_file(&dest)?, size))
        });
        tokio::select! {
            joined = &mut work => match joined {
                Ok(Ok((key, size))) => Ok((key, size, ContentSource::Cache)),
                Ok(Err(e)) => Err(Failure::Kind(asset_io(cached, e))),
                Err(join) => Err(Failure::Kind(asset_io(cached, std::io::Error::other(join.to_string())))),
            },
            _ = cancel.cancelled() => {
                // A blocking copy cannot be interrupted; let it finish so the
                // caller's cleanup removes the whole `.part` file.
                let _ = work.await;
                Err(Failure::Cancelled)
            }
        }
    }

    async fn download(
        &self,
        url: &reqwest::Url,
        part: &Path,
        cancel: &CancelToken,
    ) -> Result<(String, u64, ContentSource), Failure> {
        let download_err = |message: String| {
            Failure::Kind(AssetErrorKind::Download {
                url: url.to_string(),
                message,
            })
        };

        let mut stream = tokio::select! {
            res = self.fetcher.fetch(url) => res.map_err(|e| download_err(e.to_string()))?,
            _ = cancel.cancelled() => return Err(Failure::Cancelled),
        };
        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| Failure::Kind(asset_io(part, e)))?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        loop {
            let chunk = tokio::select! {
                next = stream.next() => next,
                _ = cancel.cancelled() => return Err(Failure::Cancelled),
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| download_err(e.to_string()))?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| Failure::Kind(asset_io(part, e)))?;
        }
        file.flush().await.map_err(|e| Failure::Kind(asset_io(part, e)))?;
        file.sync_all().await.map_err(|e| Failure::Kind(asset_io(part, e)))?;

        Ok((hex::encode(hasher.finalize()), size, ContentSource::Download))
    }
}

enum Failure {
    Cancelled,
    Kind(AssetErrorKind),
}

fn verify(asset: &RemoteAsset, key: &str, size: u64) -> Result<Verification, AssetErrorKind> {
    match &asset.content_hash {
        Some(expected) if expected.eq_ignore_ascii_case(key) => Ok(Verification::Strong),
        Some(expected) => Err(AssetErrorKind::Integrity {
            expected: expected.to_ascii_lowercase(),
            actual: key.to_string(),
        }),
        None if size == asset.size => Ok(Verification::Weak),
        None => Err(AssetErrorKind::Integrity {
            expected: format!("{} bytes", asset.size),
            actual: format!("{size} bytes"),
        }),
    }
}

fn place(part: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(part, dest)
}

fn annotate(path: &Path, err: std::io::Error) -> std::io::Error {
    std::io::Error::new(err.kind(), format!("{}: {err}", path.display()))
}
