//! Diff engine: classify every path of a remote listing and a mirror
//! inventory into exactly one [`SyncAction`].

use std::collections::{BTreeMap, HashMap};

use similar::TextDiff;

use dandimirror_core::{AssetPath, LocalFile, RemoteAsset, Timestamp};

use crate::error::{AssetErrorKind, AssetSyncError};

/// What a sync pass has to do for one path.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    Unchanged,
    FetchNew(RemoteAsset),
    FetchModified(RemoteAsset, LocalFile),
    Delete(LocalFile),
}

impl SyncAction {
    pub fn label(&self) -> &'static str {
        match self {
            SyncAction::Unchanged => "unchanged",
            SyncAction::FetchNew(_) => "new",
            SyncAction::FetchModified(..) => "modified",
            SyncAction::Delete(_) => "delete",
        }
    }

    /// The remote asset to materialize, for fetch actions.
    pub fn fetch_target(&self) -> Option<&RemoteAsset> {
        match self {
            SyncAction::FetchNew(asset) | SyncAction::FetchModified(asset, _) => Some(asset),
            _ => None,
        }
    }
}

/// Full action set of one pass, keyed by path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionPlan {
    pub actions: BTreeMap<AssetPath, SyncAction>,
}

/// Per-kind action counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub unchanged: usize,
    pub new: usize,
    pub modified: usize,
    pub delete: usize,
}

impl ActionPlan {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// `true` when nothing but `Unchanged` remains.
    pub fn is_noop(&self) -> bool {
        self.actions
            .values()
            .all(|a| matches!(a, SyncAction::Unchanged))
    }

    pub fn get(&self, path: &AssetPath) -> Option<&SyncAction> {
        self.actions.get(path)
    }

    pub fn deletions(&self) -> impl Iterator<Item = &LocalFile> {
        self.actions.values().filter_map(|a| match a {
            SyncAction::Delete(local) => Some(local),
            _ => None,
        })
    }

    pub fn fetches(&self) -> impl Iterator<Item = &RemoteAsset> {
        self.actions.values().filter_map(SyncAction::fetch_target)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut s = PlanSummary::default();
        for action in self.actions.values() {
            match action {
                SyncAction::Unchanged => s.unchanged += 1,
                SyncAction::FetchNew(_) => s.new += 1,
                SyncAction::FetchModified(..) => s.modified += 1,
                SyncAction::Delete(_) => s.delete += 1,
            }
        }
        s
    }
}

/// Split a listing into assets the mirror can hold and rejections.
///
/// Paths under a hidden top-level entry would land in mirror internals, and
/// `reserved` names files the mirror writes itself.
pub fn screen_listing(
    remote: Vec<RemoteAsset>,
    reserved: &[&str],
) -> (Vec<RemoteAsset>, Vec<AssetSyncError>) {
    let mut kept = Vec::with_capacity(remote.len());
    let mut rejected = Vec::new();
    for asset in remote {
        let reason = if asset.path.top_level().starts_with('.') {
            Some("hidden top-level entries are reserved for the mirror")
        } else if reserved.contains(&asset.path.as_str()) {
            Some("path is written by the mirror itself")
        } else {
            None
        };
        match reason {
            Some(reason) => {
                tracing::warn!(path = %asset.path, reason, "rejecting archive asset");
                rejected.push(AssetSyncError::new(
                    asset.path,
                    AssetErrorKind::Rejected {
                        reason: reason.to_string(),
                    },
                ));
            }
            None => kept.push(asset),
        }
    }
    (kept, rejected)
}

/// Compare a remote listing against the mirror's inventory.
///
/// Assets carrying a content hash are compared against the local strong key.
/// Assets without one fall back to size and mtime, which cannot see a
/// same-size rewrite that kept its timestamp.
pub fn compute(remote: &[RemoteAsset], inventory: &[LocalFile]) -> ActionPlan {
    let mut local: HashMap<&AssetPath, &LocalFile> =
        inventory.iter().map(|f| (&f.path, f)).collect();
    let mut actions = BTreeMap::new();

    for asset in remote {
        let action = match local.remove(&asset.path) {
            None => {
                tracing::debug!(path = %asset.path, "not present locally, will fetch");
                SyncAction::FetchNew(asset.clone())
            }
            Some(file) => classify(asset, file),
        };
        actions.insert(asset.path.clone(), action);
    }

    for (path, file) in local {
        tracing::debug!(path = %path, "not in remote listing, will delete");
        actions.insert(path.clone(), SyncAction::Delete(file.clone()));
    }

    ActionPlan { actions }
}

fn classify(asset: &RemoteAsset, file: &LocalFile) -> SyncAction {
    match &asset.content_hash {
        Some(hash) => {
            let same = file
                .strong_key
                .as_deref()
                .is_some_and(|key| key.eq_ignore_ascii_case(hash));
            if same {
                SyncAction::Unchanged
            } else {
                tracing::debug!(path = %asset.path, "hash shows modification, will fetch");
                SyncAction::FetchModified(asset.clone(), file.clone())
            }
        }
        None => {
            let same_mtime = asset
                .modified_at
                .map_or(true, |remote| same_instant(remote, file.mtime));
            if asset.size == file.size && same_mtime {
                SyncAction::Unchanged
            } else {
                tracing::debug!(path = %asset.path, "size or mtime differ, will fetch");
                SyncAction::FetchModified(asset.clone(), file.clone())
            }
        }
    }
}

/// Equality at microsecond precision, the finest the archive reports.
pub(crate) fn same_instant(a: Timestamp, b: Timestamp) -> bool {
    a.timestamp_micros() == b.timestamp_micros()
}

// ---------------------------------------------------------------------------
// Metadata record diff
// ---------------------------------------------------------------------------

/// Unified diff between the mirror's current record text and the one a sync
/// would write. Empty when they are identical.
pub fn metadata_diff(current: &str, incoming: &str, file_name: &str) -> String {
    let current = current.replace("\r\n", "\n");
    let incoming = incoming.replace("\r\n", "\n");
    if current == incoming {
        return String::new();
    }
    TextDiff::from_lines(&current, &incoming)
        .unified_diff()
        .header(&format!("a/{file_name}"), &format!("b/{file_name}"))
        .context_radius(3)
        .to_string()
}
