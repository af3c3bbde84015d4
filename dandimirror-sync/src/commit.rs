//! Commit coordinator.
//!
//! A [`PendingCommit`] exists once the writer has applied every action;
//! consuming it yields [`Committed`]. The snapshot's author timestamp is the
//! newest modification time among fetched assets, so two mirrors fed the same
//! archive state produce the same history. Passes that fetched nothing but
//! still changed the tree (deletions, a new metadata record) fall back to the
//! newest time in the listing, then to HEAD's own author timestamp.

use dandimirror_core::Timestamp;

use crate::error::SyncError;
use crate::store::MirrorStore;

pub const COMMIT_MESSAGE: &str = "Sync from archive";

/// Actions applied, nothing committed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommit {
    latest: Option<Timestamp>,
    listed: Option<Timestamp>,
}

/// Terminal state of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub changed: bool,
    pub snapshot: Option<String>,
    pub author_timestamp: Option<Timestamp>,
}

impl PendingCommit {
    pub fn new(latest: Option<Timestamp>) -> Self {
        Self { latest, listed: None }
    }

    /// Newest `modified_at` in the whole listing, used when nothing was fetched.
    pub fn or_listed(self, listed: Option<Timestamp>) -> Self {
        Self { listed, ..self }
    }

    pub fn latest(&self) -> Option<Timestamp> {
        self.latest
    }

    /// Commit the staged tree. No snapshot is written when the tree equals
    /// HEAD's, or when no author timestamp can be derived at all.
    pub fn commit(self, store: &mut MirrorStore, message: &str) -> Result<Committed, SyncError> {
        let author = match self.latest.or(self.listed) {
            Some(ts) => Some(ts),
            None => store.head()?.map(|h| h.author_timestamp),
        };
        let Some(author) = author else {
            tracing::info!(mirror = %store.root().display(), "no timestamp to author with, skipping commit");
            store.save_index()?;
            return Ok(Committed {
                changed: false,
                snapshot: None,
                author_timestamp: None,
            });
        };

        let outcome = store.commit(author, message)?;
        if outcome.changed {
            tracing::info!(
                mirror = %store.root().display(),
                snapshot = outcome.snapshot.as_deref().unwrap_or_default(),
                author = %author,
                "committed snapshot"
            );
        } else {
            tracing::info!(mirror = %store.root().display(), "tree unchanged, no snapshot written");
        }
        Ok(Committed {
            changed: outcome.changed,
            snapshot: outcome.snapshot,
            author_timestamp: Some(author),
        })
    }
}
