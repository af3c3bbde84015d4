//! Mirror writer: apply an [`ActionPlan`] to a mirror.
//!
//! ## Order
//!
//! 1. Replace the metadata record (fatal on failure).
//! 2. Apply every `Delete` and untrack files that vanished on their own.
//! 3. Resolve every `FetchNew` / `FetchModified` with bounded concurrency,
//!    staging and registering provenance as results arrive.
//! 4. Save the index.
//!
//! Per-asset failures are collected and never stop sibling assets.

use futures::stream::{self, StreamExt};
use serde::Serialize;

use dandimirror_core::{AssetPath, CollectionId, MetadataRecord, Timestamp};

use crate::cancel::CancelToken;
use crate::diff::ActionPlan;
use crate::error::{asset_io, AssetErrorKind, AssetSyncError, SyncError};
use crate::locator::hash_bytes;
use crate::metadata::{self, METADATA_FILE};
use crate::resolver::{ContentResolver, ContentSource, ResolveError, Verification};
use crate::store::MirrorStore;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// One asset that was materialized and staged during the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedAsset {
    pub path: AssetPath,
    pub key: String,
    pub source: ContentSource,
    pub verification: Verification,
}

/// Advisory: the asset was accepted on size alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeakVerificationNotice {
    pub path: AssetPath,
}

/// What [`apply`] did.
#[derive(Debug, Default)]
pub struct WriteReport {
    pub synced: Vec<SyncedAsset>,
    pub deleted: Vec<AssetPath>,
    pub errors: Vec<AssetSyncError>,
    pub notices: Vec<WeakVerificationNotice>,
    /// Newest `modified_at` among successfully fetched assets.
    pub latest: Option<Timestamp>,
}

impl WriteReport {
    fn observe(&mut self, modified: Option<Timestamp>) {
        if let Some(ts) = modified {
            if self.latest.map_or(true, |latest| ts > latest) {
                self.latest = Some(ts);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Apply `plan` to the mirror behind `store`.
///
/// Returns [`SyncError::Cancelled`] if `cancel` fires; whatever was staged up
/// to that point is saved to the index but nothing is committed.
pub async fn apply(
    store: &mut MirrorStore,
    resolver: &ContentResolver,
    collection: &CollectionId,
    record: &MetadataRecord,
    plan: &ActionPlan,
    jobs: usize,
    cancel: &CancelToken,
) -> Result<WriteReport, SyncError> {
    let mut report = WriteReport::default();

    write_metadata(store, collection, record)?;

    for local in plan.deletions() {
        tracing::info!(collection = %collection, path = %local.path, "in mirror but not in archive, deleting");
        match store.unstage(&local.path) {
            Ok(_) => report.deleted.push(local.path.clone()),
            Err(err) => report
                .errors
                .push(AssetSyncError::new(local.path.clone(), into_asset_kind(err))),
        }
    }

    for path in store.forget_missing() {
        tracing::debug!(collection = %collection, path = %path, "file vanished from mirror, untracking");
    }

    let mut cancelled = false;
    {
        let mut results = stream::iter(plan.fetches())
            .map(|asset| async move { (asset, resolver.resolve(asset, cancel).await) })
            .buffer_unordered(jobs.max(1));

        while let Some((asset, outcome)) = results.next().await {
            let done = match outcome {
                Ok(done) => done,
                // Drain instead of dropping in-flight resolves, so none of
                // them is still writing when staging is cleared below.
                Err(ResolveError::Cancelled) => {
                    cancelled = true;
                    continue;
                }
                Err(ResolveError::Asset(err)) => {
                    tracing::warn!(collection = %collection, path = %err.path, error = %err.kind, "asset failed");
                    report.errors.push(err);
                    continue;
                }
            };

            let staged = store
                .stage(&done.path, &done.key)
                .and_then(|()| store.register_origin(&done.path, &done.origin));
            if let Err(err) = staged {
                report
                    .errors
                    .push(AssetSyncError::new(done.path.clone(), into_asset_kind(err)));
                continue;
            }

            if done.verification == Verification::Weak {
                tracing::warn!(collection = %collection, path = %done.path, "no archive hash, accepted on size only");
                report.notices.push(WeakVerificationNotice {
                    path: done.path.clone(),
                });
            }
            report.observe(asset.modified_at);
            report.synced.push(SyncedAsset {
                path: done.path,
                key: done.key,
                source: done.source,
                verification: done.verification,
            });
        }
    }

    store.save_index()?;

    if cancelled || cancel.is_cancelled() {
        tracing::warn!(collection = %collection, "cancelled, leaving staged changes uncommitted");
        if let Err(err) = store.clear_staging() {
            tracing::debug!(error = %err, "could not clear staging area");
        }
        return Err(SyncError::Cancelled);
    }

    report.errors.sort_by(|a, b| a.path.cmp(&b.path));
    report.synced.sort_by(|a, b| a.path.cmp(&b.path));
    report.notices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(report)
}

/// Rewrite the metadata record and stage it so snapshots track it.
fn write_metadata(
    store: &mut MirrorStore,
    collection: &CollectionId,
    record: &MetadataRecord,
) -> Result<(), SyncError> {
    metadata::write_record(store.root(), collection, record)?;
    let rendered = metadata::render_record(collection, record)?;
    let path = AssetPath::parse(METADATA_FILE).map_err(|e| SyncError::CorruptStore {
        path: metadata::record_path(store.root()),
        reason: e.to_string(),
    })?;
    store.stage(&path, &hash_bytes(rendered.as_bytes()))
}

fn into_asset_kind(err: SyncError) -> AssetErrorKind {
    match err {
        SyncError::Io { path, source } | SyncError::Setup { path, source } => asset_io(path, source),
        other => AssetErrorKind::Io {
            path: Default::default(),
            source: std::io::Error::other(other.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use dandimirror_core::{Metadata, RemoteAsset};
    use reqwest::Url;
    use tempfile::TempDir;

    use crate::diff;
    use crate::fetch::{ByteStream, FetchError, Fetcher};
    use crate::locator::ObjectLocator;

    struct MapFetcher(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &Url) -> Result<ByteStream, FetchError> {
            let body = self.0.get(url.as_str()).cloned().ok_or(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })?;
            Ok(stream::once(async move { Ok(Bytes::from(body)) }).boxed())
        }
    }

    const BASE: &str = "https://bucket.example/";

    fn asset(path: &str, body: &[u8], secs: i64, with_hash: bool) -> RemoteAsset {
        RemoteAsset {
            path: AssetPath::parse(path).unwrap(),
            storage_key: format!("blobs/{path}"),
            content_hash: with_hash.then(|| hash_bytes(body)),
            size: body.len() as u64,
            modified_at: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            metadata: Metadata::new(),
        }
    }

    fn setup(dir: &TempDir, bodies: &[(&str, &[u8])]) -> (MirrorStore, ContentResolver) {
        let store = MirrorStore::open(&dir.path().join("000027")).unwrap();
        let map = bodies
            .iter()
            .map(|(p, b)| (format!("{BASE}blobs/{p}"), b.to_vec()))
            .collect();
        let resolver = ContentResolver::new(
            ObjectLocator::new(None, Url::parse(BASE).unwrap()),
            Arc::new(MapFetcher(map)),
            store.root().to_path_buf(),
            store.staging_dir(),
        );
        (store, resolver)
    }

    #[tokio::test]
    async fn applies_deletes_then_fetches_and_tracks_latest() {
        let dir = TempDir::new().unwrap();
        let (mut store, resolver) = setup(&dir, &[("a/x.dat", b"x"), ("a/y.dat", b"yy")]);
        std::fs::create_dir_all(store.root().join("old")).unwrap();
        std::fs::write(store.root().join("old").join("z.dat"), b"z").unwrap();

        let remote = vec![asset("a/x.dat", b"x", 100, true), asset("a/y.dat", b"yy", 300, true)];
        let plan = diff::compute(&remote, &store.current_inventory(&[METADATA_FILE]).unwrap());
        let id = CollectionId::from("000027");

        let report = apply(&mut store, &resolver, &id, &MetadataRecord::default(), &plan, 2, &CancelToken::never())
            .await
            .unwrap();

        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.synced.len(), 2);
        assert_eq!(report.deleted, vec![AssetPath::parse("old/z.dat").unwrap()]);
        assert_eq!(report.latest, Some(Utc.timestamp_opt(300, 0).unwrap()));
        assert!(store.root().join(METADATA_FILE).is_file());
        assert!(!store.root().join("old").exists());
        let origins = &store.entry(&AssetPath::parse("a/x.dat").unwrap()).unwrap().origins;
        assert!(origins.contains(&format!("{BASE}blobs/a/x.dat")));
    }

    #[tokio::test]
    async fn failed_asset_does_not_stop_siblings() {
        let dir = TempDir::new().unwrap();
        let (mut store, resolver) = setup(&dir, &[("good.dat", b"good")]);
        let remote = vec![asset("good.dat", b"good", 10, true), asset("missing.dat", b"m", 999, true)];
        let plan = diff::compute(&remote, &[]);

        let report = apply(
            &mut store,
            &resolver,
            &CollectionId::from("000027"),
            &MetadataRecord::default(),
            &plan,
            4,
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert_eq!(report.synced.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path.as_str(), "missing.dat");
        assert_eq!(report.latest, Some(Utc.timestamp_opt(10, 0).unwrap()), "failed fetch must not advance");
    }

    #[tokio::test]
    async fn unhashed_assets_produce_notices() {
        let dir = TempDir::new().unwrap();
        let (mut store, resolver) = setup(&dir, &[("w.dat", b"weak")]);
        let plan = diff::compute(&[asset("w.dat", b"weak", 5, false)], &[]);

        let report = apply(
            &mut store,
            &resolver,
            &CollectionId::from("000027"),
            &MetadataRecord::default(),
            &plan,
            1,
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert_eq!(report.notices, vec![WeakVerificationNotice { path: AssetPath::parse("w.dat").unwrap() }]);
        assert_eq!(report.synced[0].verification, Verification::Weak);
    }

    #[tokio::test]
    async fn cancellation_saves_index_without_error_list() {
        let dir = TempDir::new().unwrap();
        let (mut store, resolver) = setup(&dir, &[("a.dat", b"a")]);
        let plan = diff::compute(&[asset("a.dat", b"a", 5, true)], &[]);
        let (handle, token) = crate::cancel::cancel_pair();
        handle.cancel();

        let err = apply(
            &mut store,
            &resolver,
            &CollectionId::from("000027"),
            &MetadataRecord::default(),
            &plan,
            1,
            &token,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(store.head().unwrap().is_none());
    }
}
