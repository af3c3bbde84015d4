//! Read-only summary of the mirrors under a target directory.

use std::path::{Path, PathBuf};

use serde::Serialize;

use dandimirror_core::{CollectionId, Timestamp};

use crate::error::{io_err, SyncError};
use crate::metadata;
use crate::store::MirrorStore;

/// One row of `dandimirror status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorStatus {
    pub collection: CollectionId,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_timestamp: Option<Timestamp>,
    pub snapshots: usize,
    /// Paths in the index, the metadata record included.
    pub tracked: usize,
}

/// Every mirror directly under `target`, sorted by collection id.
///
/// A missing target is reported as having no mirrors.
pub fn mirror_status(target: &Path) -> Result<Vec<MirrorStatus>, SyncError> {
    let entries = match std::fs::read_dir(target) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(target, err)),
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(target, e))?;
        let path = entry.path();
        if !path.is_dir() || !MirrorStore::exists(&path) {
            continue;
        }
        let store = MirrorStore::open_existing(&path)?;
        let log = store.log()?;
        let head = log.first();
        let name = metadata::read_record(&path)?
            .and_then(|r| r.0.get("name").and_then(|v| v.as_str()).map(str::to_string));

        out.push(MirrorStatus {
            collection: CollectionId::from(entry.file_name().to_string_lossy().into_owned()),
            head: head.map(|s| s.id.clone()),
            author_timestamp: head.map(|s| s.author_timestamp),
            snapshots: log.len(),
            tracked: store.tracked().count(),
            name,
            path,
        });
    }
    out.sort_by(|a, b| a.collection.cmp(&b.collection));
    Ok(out)
}
