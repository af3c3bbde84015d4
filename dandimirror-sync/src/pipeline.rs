//! Sync pipeline entrypoints used by the CLI.
//!
//! One pass per collection: lock → fetch listing and record → diff →
//! write → commit. Passes over different collections share nothing and run
//! concurrently in [`Mirrorer::sync_many`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Url;
use serde::{Serialize, Serializer};

use dandimirror_core::{AssetPath, CollectionId, Instance, MirrorConfig, Timestamp};

use crate::archive::Archive;
use crate::cancel::CancelToken;
use crate::commit::{PendingCommit, COMMIT_MESSAGE};
use crate::diff::{self, ActionPlan};
use crate::error::{setup_err, AssetSyncError, SyncError};
use crate::fetch::Fetcher;
use crate::locator::ObjectLocator;
use crate::lock::MirrorLock;
use crate::metadata::{self, METADATA_FILE};
use crate::resolver::ContentResolver;
use crate::store::{MirrorStore, LOCK_FILE, STORE_DIR};
use crate::writer::{self, SyncedAsset, WeakVerificationNotice};

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Everything a pass needs besides the archive and fetcher handles.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Directory holding one mirror per collection.
    pub target: PathBuf,
    pub version: String,
    pub assetstore: Option<PathBuf>,
    pub download_base: Url,
    pub jobs: usize,
    pub collection_jobs: usize,
}

impl SyncOptions {
    pub fn from_config(
        config: &MirrorConfig,
        instance: &Instance,
        target: PathBuf,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let download_base = Url::parse(&instance.download_base).map_err(|e| {
            SyncError::Config(dandimirror_core::ConfigError::Invalid {
                field: "download_base_url",
                reason: e.to_string(),
            })
        })?;
        Ok(Self {
            target,
            version: config.version.clone(),
            assetstore: config.assetstore.clone(),
            download_base,
            jobs: config.jobs,
            collection_jobs: config.collection_jobs,
        })
    }
}

/// Outcome of one collection pass.
#[derive(Debug, Serialize)]
pub struct SyncResult {
    pub collection: CollectionId,
    pub latest_asset_timestamp: Option<Timestamp>,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<AssetSyncError>,
    pub notices: Vec<WeakVerificationNotice>,
    pub synced: Vec<SyncedAsset>,
    pub deleted: Vec<AssetPath>,
    pub unchanged: usize,
}

impl SyncResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn serialize_errors<S: Serializer>(errors: &[AssetSyncError], ser: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Entry<'a> {
        path: &'a AssetPath,
        kind: &'static str,
        error: String,
    }
    ser.collect_seq(errors.iter().map(|e| Entry {
        path: &e.path,
        kind: if e.is_integrity() {
            "integrity"
        } else if e.is_rejected() {
            "rejected"
        } else {
            "transient"
        },
        error: e.kind.to_string(),
    }))
}

/// Dry-run view of a pass.
#[derive(Debug)]
pub struct CollectionPlan {
    pub collection: CollectionId,
    pub mirror: PathBuf,
    pub plan: ActionPlan,
    /// Unified diff of the metadata record; empty when unchanged.
    pub metadata_diff: String,
}

// ---------------------------------------------------------------------------
// Exit status
// ---------------------------------------------------------------------------

/// Process exit status for a batch of passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// Some assets failed; everything else was committed.
    Partial,
    /// A pass aborted.
    Failure,
    /// A mirror was locked by another pass.
    Busy,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::Partial => 3,
            ExitStatus::Busy => 75,
        }
    }

    /// Hard failures outrank lock contention, which outranks per-asset errors.
    pub fn from_results(
        results: &[(CollectionId, Result<SyncResult, SyncError>)],
        ignore_errors: bool,
    ) -> Self {
        let mut status = ExitStatus::Success;
        for (_, result) in results {
            let this = match result {
                Err(SyncError::MirrorBusy { .. }) => ExitStatus::Busy,
                Err(_) => ExitStatus::Failure,
                Ok(r) if !r.is_clean() && !ignore_errors => ExitStatus::Partial,
                Ok(_) => ExitStatus::Success,
            };
            status = status.max_severity(this);
        }
        status
    }

    fn rank(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Partial => 1,
            ExitStatus::Busy => 2,
            ExitStatus::Failure => 3,
        }
    }

    fn max_severity(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

// ---------------------------------------------------------------------------
// Mirrorer
// ---------------------------------------------------------------------------

/// Runs sync passes against one archive into one target directory.
pub struct Mirrorer {
    archive: Arc<dyn Archive>,
    fetcher: Arc<dyn Fetcher>,
    options: SyncOptions,
}

impl Mirrorer {
    pub fn new(archive: Arc<dyn Archive>, fetcher: Arc<dyn Fetcher>, options: SyncOptions) -> Self {
        Self {
            archive,
            fetcher,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn mirror_path(&self, id: &CollectionId) -> PathBuf {
        self.options.target.join(&id.0)
    }

    fn locator(&self) -> ObjectLocator {
        ObjectLocator::new(self.options.assetstore.clone(), self.options.download_base.clone())
    }

    /// Run one pass over `id`.
    ///
    /// Fails with [`SyncError::MirrorBusy`] before touching the mirror if
    /// another pass holds its lock.
    pub async fn sync_collection(
        &self,
        id: &CollectionId,
        cancel: &CancelToken,
    ) -> Result<SyncResult, SyncError> {
        let root = self.mirror_path(id);
        let store_dir = root.join(STORE_DIR);
        std::fs::create_dir_all(&store_dir).map_err(|e| setup_err(&store_dir, e))?;
        let _lock = MirrorLock::acquire(&store_dir.join(LOCK_FILE), id)?;

        let mut store = MirrorStore::open(&root)?;
        store.clear_staging()?;
        tracing::info!(collection = %id, mirror = %root.display(), "syncing");

        let version = &self.options.version;
        let listing = async {
            let record = self.archive.collection_metadata(id, version).await?;
            let remote = self.archive.list_assets(id, version).await?;
            Ok::<_, SyncError>((record, remote))
        };
        let (record, remote) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            res = listing => res?,
        };

        let (remote, rejected) = diff::screen_listing(remote, &[METADATA_FILE]);
        let inventory = store.current_inventory(&[METADATA_FILE])?;
        let plan = diff::compute(&remote, &inventory);
        let summary = plan.summary();
        tracing::info!(
            collection = %id,
            new = summary.new,
            modified = summary.modified,
            delete = summary.delete,
            unchanged = summary.unchanged,
            "computed action plan"
        );

        let resolver = ContentResolver::new(
            self.locator(),
            Arc::clone(&self.fetcher),
            root.clone(),
            store.staging_dir(),
        );
        let mut report = writer::apply(
            &mut store,
            &resolver,
            id,
            &record,
            &plan,
            self.options.jobs,
            cancel,
        )
        .await?;

        let committed = PendingCommit::new(report.latest)
            .or_listed(remote.iter().filter_map(|a| a.modified_at).max())
            .commit(&mut store, COMMIT_MESSAGE)?;

        report.errors.extend(rejected);
        report.errors.sort_by(|a, b| a.path.cmp(&b.path));
        if !report.errors.is_empty() {
            tracing::warn!(collection = %id, failed = report.errors.len(), "pass finished with asset errors");
        }

        Ok(SyncResult {
            collection: id.clone(),
            latest_asset_timestamp: report.latest,
            changed: committed.changed,
            snapshot: committed.snapshot,
            errors: report.errors,
            notices: report.notices,
            synced: report.synced,
            deleted: report.deleted,
            unchanged: summary.unchanged,
        })
    }

    /// Compute what a pass over `id` would do. Writes nothing.
    pub async fn plan_collection(&self, id: &CollectionId) -> Result<CollectionPlan, SyncError> {
        let root = self.mirror_path(id);
        let version = &self.options.version;
        let record = self.archive.collection_metadata(id, version).await?;
        let remote = self.archive.list_assets(id, version).await?;
        let (remote, _rejected) = diff::screen_listing(remote, &[METADATA_FILE]);

        let (inventory, current) = if MirrorStore::exists(&root) {
            let store = MirrorStore::open_existing(&root)?;
            let current = read_or_empty(&metadata::record_path(&root))?;
            (store.current_inventory(&[METADATA_FILE])?, current)
        } else {
            (Vec::new(), String::new())
        };

        let incoming = metadata::render_record(id, &record)?;
        Ok(CollectionPlan {
            collection: id.clone(),
            mirror: root,
            plan: diff::compute(&remote, &inventory),
            metadata_diff: diff::metadata_diff(&current, &incoming, METADATA_FILE),
        })
    }

    /// Sync several collections, up to `collection_jobs` at a time.
    ///
    /// Results come back sorted by collection id; one failure never stops
    /// the others.
    pub async fn sync_many(
        &self,
        ids: Vec<CollectionId>,
        cancel: &CancelToken,
    ) -> Vec<(CollectionId, Result<SyncResult, SyncError>)> {
        let mut results: Vec<_> = stream::iter(ids)
            .map(|id| async move {
                let result = self.sync_collection(&id, cancel).await;
                if let Err(err) = &result {
                    tracing::error!(collection = %id, error = %err, "sync failed");
                }
                (id, result)
            })
            .buffer_unordered(self.options.collection_jobs.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Enumerate every collection in the archive and sync them all.
    pub async fn sync_all(
        &self,
        cancel: &CancelToken,
    ) -> Result<Vec<(CollectionId, Result<SyncResult, SyncError>)>, SyncError> {
        let ids: Vec<CollectionId> = self.archive.list_collections().try_collect().await?;
        tracing::info!(count = ids.len(), "enumerated collections");
        Ok(self.sync_many(ids, cancel).await)
    }
}

fn read_or_empty(path: &Path) -> Result<String, SyncError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(crate::error::io_err(path, err)),
    }
}
