//! Content-addressed versioned store behind each mirror.
//!
//! # Layout
//!
//! ```text
//! <mirror>/
//!   dandiset.yaml            metadata record (tracked)
//!   sub-01/...               working tree (tracked)
//!   .mirror/
//!     index.json             staged state: path → {key, size, mtime, origins}
//!     HEAD                   current snapshot id
//!     snapshots/<id>.json    immutable snapshots
//!     objects/<k[..2]>/<k>   content by SHA-256
//!     tmp/                   in-flight materializations
//!     lock                   per-mirror exclusion lock
//! ```
//!
//! Index, HEAD and snapshot writes use the same `.tmp` + rename pattern.
//! Objects are never deleted, so removing a working-tree file keeps history.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use dandimirror_core::{AssetPath, LocalFile, Timestamp};

use crate::error::{io_err, setup_err, SyncError};
use crate::fsutil;
use crate::locator::local_identity;

pub const STORE_DIR: &str = ".mirror";
const INDEX_FILE: &str = "index.json";
const HEAD_FILE: &str = "HEAD";
const OBJECTS_DIR: &str = "objects";
const SNAPSHOTS_DIR: &str = "snapshots";
const TMP_DIR: &str = "tmp";
pub const LOCK_FILE: &str = "lock";
const INDEX_VERSION: u32 = 1;

/// Staged state of one tracked path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: String,
    pub size: u64,
    pub mtime: Timestamp,
    /// Where this content can be fetched from again.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub origins: BTreeSet<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<AssetPath, IndexEntry>,
}

/// One committed state of the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub tree: String,
    pub author_timestamp: Timestamp,
    pub message: String,
    pub entries: BTreeMap<AssetPath, String>,
}

/// What [`MirrorStore::commit`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// `true` only if a new snapshot differing from its parent was written.
    pub changed: bool,
    pub snapshot: Option<String>,
}

/// Handle on one mirror's working tree and store directory.
#[derive(Debug)]
pub struct MirrorStore {
    root: PathBuf,
    index: BTreeMap<AssetPath, IndexEntry>,
}

impl MirrorStore {
    /// Open the mirror at `root`, creating an empty one on first encounter.
    pub fn open(root: &Path) -> Result<Self, SyncError> {
        let store_dir = root.join(STORE_DIR);
        for dir in [
            root.to_path_buf(),
            store_dir.clone(),
            store_dir.join(OBJECTS_DIR),
            store_dir.join(SNAPSHOTS_DIR),
            store_dir.join(TMP_DIR),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| setup_err(&dir, e))?;
        }
        Self::load(root)
    }

    /// Open an existing mirror for reading. Creates nothing on disk.
    pub fn open_existing(root: &Path) -> Result<Self, SyncError> {
        let store_dir = root.join(STORE_DIR);
        if !store_dir.is_dir() {
            return Err(SyncError::CorruptStore {
                path: store_dir,
                reason: "not a mirror".to_string(),
            });
        }
        Self::load(root)
    }

    fn load(root: &Path) -> Result<Self, SyncError> {
        let index_path = root.join(STORE_DIR).join(INDEX_FILE);
        let index = match std::fs::read_to_string(&index_path) {
            Ok(contents) => {
                let file: IndexFile = serde_json::from_str(&contents)?;
                if file.version != INDEX_VERSION {
                    return Err(SyncError::CorruptStore {
                        path: index_path,
                        reason: format!("unsupported index version {}", file.version),
                    });
                }
                file.entries
            }
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(setup_err(&index_path, err)),
        };

        Ok(Self {
            root: root.to_path_buf(),
            index,
        })
    }

    /// Whether `root` already holds a mirror store.
    pub fn exists(root: &Path) -> bool {
        root.join(STORE_DIR).is_dir()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.store_dir().join(TMP_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.store_dir().join(LOCK_FILE)
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or(key);
        self.store_dir().join(OBJECTS_DIR).join(shard).join(key)
    }

    pub fn entry(&self, path: &AssetPath) -> Option<&IndexEntry> {
        self.index.get(path)
    }

    pub fn tracked(&self) -> impl Iterator<Item = (&AssetPath, &IndexEntry)> {
        self.index.iter()
    }

    /// Drop leftovers of an interrupted pass.
    pub fn clear_staging(&self) -> Result<(), SyncError> {
        let dir = self.staging_dir();
        let entries = std::fs::read_dir(&dir).map_err(|e| setup_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| setup_err(&dir, e))?;
            let path = entry.path();
            if path.is_file() {
                std::fs::remove_file(&path).map_err(|e| setup_err(&path, e))?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inventory
    // -----------------------------------------------------------------------

    /// Scan the working tree.
    ///
    /// Hidden top-level entries and the names in `exclude` are skipped. A
    /// file's `strong_key` is reported only while its size and mtime still
    /// match what was staged.
    pub fn current_inventory(&self, exclude: &[&str]) -> Result<Vec<LocalFile>, SyncError> {
        let mut files = Vec::new();
        let top = std::fs::read_dir(&self.root).map_err(|e| io_err(&self.root, e))?;
        for entry in top {
            let entry = entry.map_err(|e| io_err(&self.root, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || exclude.contains(&name.as_ref()) {
                continue;
            }
            for item in WalkDir::new(entry.path()).follow_links(false) {
                let item = item.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    io_err(path, e.into())
                })?;
                if !item.file_type().is_file() {
                    continue;
                }
                let path = match AssetPath::from_fs_path(&self.root, item.path()) {
                    Ok(path) => path,
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping unrepresentable path");
                        continue;
                    }
                };
                let identity = local_identity(item.path()).map_err(|e| io_err(item.path(), e))?;
                let strong_key = self
                    .index
                    .get(&path)
                    .filter(|e| e.size == identity.size && e.mtime == identity.mtime)
                    .map(|e| e.key.clone());
                files.push(LocalFile {
                    path,
                    strong_key,
                    size: identity.size,
                    mtime: identity.mtime,
                });
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    /// Record the working-tree file at `path` as having content `key`.
    ///
    /// Origins survive re-staging only when the content is unchanged.
    pub fn stage(&mut self, path: &AssetPath, key: &str) -> Result<(), SyncError> {
        let fs_path = path.to_fs_path(&self.root);
        let identity = local_identity(&fs_path).map_err(|e| io_err(&fs_path, e))?;
        let object = self.object_path(key);
        fsutil::link_object(&fs_path, &object).map_err(|e| io_err(&object, e))?;

        let origins = match self.index.get(path) {
            Some(prev) if prev.key == key => prev.origins.clone(),
            _ => BTreeSet::new(),
        };
        self.index.insert(
            path.clone(),
            IndexEntry {
                key: key.to_string(),
                size: identity.size,
                mtime: identity.mtime,
                origins,
            },
        );
        Ok(())
    }

    /// Remove `path` from the working tree and the index.
    ///
    /// Returns whether anything was removed.
    pub fn unstage(&mut self, path: &AssetPath) -> Result<bool, SyncError> {
        let fs_path = path.to_fs_path(&self.root);
        let existed = fs_path.exists();
        fsutil::remove_if_exists(&fs_path).map_err(|e| io_err(&fs_path, e))?;
        fsutil::prune_empty_parents(&fs_path, &self.root);
        Ok(self.index.remove(path).is_some() || existed)
    }

    /// Drop index entries whose working-tree file is gone.
    pub fn forget_missing(&mut self) -> Vec<AssetPath> {
        let root = &self.root;
        let missing: Vec<AssetPath> = self
            .index
            .keys()
            .filter(|path| !path.to_fs_path(root).is_file())
            .cloned()
            .collect();
        for path in &missing {
            self.index.remove(path);
        }
        missing
    }

    /// Attach an origin URL to a staged path. Re-registering is a no-op.
    ///
    /// Returns whether the origin was new.
    pub fn register_origin(&mut self, path: &AssetPath, origin: &str) -> Result<bool, SyncError> {
        let entry = self
            .index
            .get_mut(path)
            .ok_or_else(|| SyncError::CorruptStore {
                path: path.to_fs_path(&self.root),
                reason: "cannot register origin on an unstaged path".to_string(),
            })?;
        Ok(entry.origins.insert(origin.to_string()))
    }

    pub fn save_index(&self) -> Result<(), SyncError> {
        let path = self.store_dir().join(INDEX_FILE);
        let file = IndexFile {
            version: INDEX_VERSION,
            entries: self.index.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        fsutil::atomic_write(&path, &json).map_err(|e| io_err(&path, e))
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Digest over the sorted `path\0key` lines of the index.
    pub fn tree_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, entry) in &self.index {
            hasher.update(path.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.key.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    pub fn head(&self) -> Result<Option<Snapshot>, SyncError> {
        let path = self.store_dir().join(HEAD_FILE);
        match std::fs::read_to_string(&path) {
            Ok(id) => {
                let id = id.trim();
                if id.is_empty() {
                    return Ok(None);
                }
                self.snapshot(id).map(Some)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    pub fn snapshot(&self, id: &str) -> Result<Snapshot, SyncError> {
        let path = self.store_dir().join(SNAPSHOTS_DIR).join(format!("{id}.json"));
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SyncError::CorruptStore {
                    path,
                    reason: format!("snapshot {id} is missing"),
                })
            }
            Err(err) => return Err(io_err(&path, err)),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    /// Snapshots from HEAD back to the root, newest first.
    pub fn log(&self) -> Result<Vec<Snapshot>, SyncError> {
        let mut out = Vec::new();
        let mut next = self.head()?;
        while let Some(snapshot) = next {
            next = match &snapshot.parent {
                Some(parent) => Some(self.snapshot(parent)?),
                None => None,
            };
            out.push(snapshot);
        }
        Ok(out)
    }

    /// Persist the index and, if its tree differs from HEAD's, a new snapshot.
    pub fn commit(&mut self, author: Timestamp, message: &str) -> Result<CommitOutcome, SyncError> {
        self.save_index()?;
        let tree = self.tree_hash();
        let head = self.head()?;
        if head.as_ref().is_some_and(|h| h.tree == tree) {
            return Ok(CommitOutcome {
                changed: false,
                snapshot: None,
            });
        }

        let parent = head.map(|h| h.id);
        let id = snapshot_id(parent.as_deref(), &tree, author, message);
        let snapshot = Snapshot {
            id: id.clone(),
            parent,
            tree,
            author_timestamp: author,
            message: message.to_string(),
            entries: self
                .index
                .iter()
                .map(|(path, entry)| (path.clone(), entry.key.clone()))
                .collect(),
        };

        let snapshot_path = self
            .store_dir()
            .join(SNAPSHOTS_DIR)
            .join(format!("{id}.json"));
        let json = serde_json::to_vec_pretty(&snapshot)?;
        fsutil::atomic_write(&snapshot_path, &json).map_err(|e| io_err(&snapshot_path, e))?;

        let head_path = self.store_dir().join(HEAD_FILE);
        fsutil::atomic_write(&head_path, format!("{id}\n").as_bytes())
            .map_err(|e| io_err(&head_path, e))?;

        Ok(CommitOutcome {
            changed: true,
            snapshot: Some(id),
        })
    }
}

fn snapshot_id(parent: Option<&str>, tree: &str, author: Timestamp, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("parent {}\n", parent.unwrap_or("")));
    hasher.update(format!("tree {tree}\n"));
    hasher.update(format!(
        "author {}\n\n",
        author.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    ));
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())
}
