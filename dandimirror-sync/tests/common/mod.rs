#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Url;
use tempfile::TempDir;

use dandimirror_core::{
    AssetPath, CollectionId, Metadata, MetadataRecord, RemoteAsset, Timestamp,
};
use dandimirror_sync::locator::hash_bytes;
use dandimirror_sync::{
    Archive, ArchiveError, ByteStream, FetchError, Fetcher, Mirrorer, SyncOptions,
};

pub const BASE: &str = "https://bucket.example/";

/// Route engine logs to the test harness; `RUST_LOG=debug` shows them.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn path(raw: &str) -> AssetPath {
    AssetPath::parse(raw).expect("valid asset path")
}

pub fn key_for(raw: &str) -> String {
    format!("blobs/{}", hash_bytes(raw.as_bytes()))
}

/// Build an asset whose storage key is derived from its path.
pub fn asset(raw: &str, body: &[u8], secs: i64) -> RemoteAsset {
    RemoteAsset {
        path: path(raw),
        storage_key: key_for(raw),
        content_hash: Some(hash_bytes(body)),
        size: body.len() as u64,
        modified_at: Some(ts(secs)),
        metadata: Metadata::new(),
    }
}

pub fn unhashed(raw: &str, body: &[u8], secs: i64) -> RemoteAsset {
    RemoteAsset {
        content_hash: None,
        ..asset(raw, body, secs)
    }
}

pub fn record(name: &str) -> MetadataRecord {
    let mut fields = Metadata::new();
    fields.insert("name".into(), name.into());
    MetadataRecord(fields)
}

// ---------------------------------------------------------------------------
// StaticArchive
// ---------------------------------------------------------------------------

/// In-memory archive whose listings tests can swap between passes.
#[derive(Default)]
pub struct StaticArchive {
    collections: Mutex<BTreeMap<CollectionId, (MetadataRecord, Vec<RemoteAsset>)>>,
}

impl StaticArchive {
    pub fn set(&self, id: &str, record: MetadataRecord, assets: Vec<RemoteAsset>) {
        self.collections
            .lock()
            .unwrap()
            .insert(CollectionId::from(id), (record, assets));
    }

    fn get(&self, id: &CollectionId) -> Result<(MetadataRecord, Vec<RemoteAsset>), ArchiveError> {
        self.collections
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(id.clone()))
    }
}

#[async_trait]
impl Archive for StaticArchive {
    fn list_collections(&self) -> BoxStream<'_, Result<CollectionId, ArchiveError>> {
        let ids: Vec<_> = self.collections.lock().unwrap().keys().cloned().map(Ok).collect();
        stream::iter(ids).boxed()
    }

    async fn list_assets(
        &self,
        id: &CollectionId,
        _version: &str,
    ) -> Result<Vec<RemoteAsset>, ArchiveError> {
        Ok(self.get(id)?.1)
    }

    async fn collection_metadata(
        &self,
        id: &CollectionId,
        _version: &str,
    ) -> Result<MetadataRecord, ArchiveError> {
        Ok(self.get(id)?.0)
    }
}

// ---------------------------------------------------------------------------
// MemoryFetcher
// ---------------------------------------------------------------------------

/// Serves bodies from memory; URLs marked corrupt get their bytes flipped.
#[derive(Default)]
pub struct MemoryFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    corrupt: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MemoryFetcher {
    pub fn serve(&self, raw_path: &str, body: &[u8]) {
        self.bodies
            .lock()
            .unwrap()
            .insert(format!("{BASE}{}", key_for(raw_path)), body.to_vec());
    }

    pub fn corrupt(&self, raw_path: &str) {
        self.corrupt
            .lock()
            .unwrap()
            .insert(format!("{BASE}{}", key_for(raw_path)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<ByteStream, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut body = self
            .bodies
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })?;
        if self.corrupt.lock().unwrap().contains(url.as_str()) {
            for byte in &mut body {
                *byte ^= 0xff;
            }
        }
        let chunks: Vec<Result<Bytes, FetchError>> = body
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub dir: TempDir,
    pub archive: Arc<StaticArchive>,
    pub fetcher: Arc<MemoryFetcher>,
    pub mirrorer: Mirrorer,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_assetstore(None)
    }

    pub fn with_assetstore(assetstore: Option<PathBuf>) -> Self {
        init_logging();
        let dir = TempDir::new().expect("tempdir");
        let archive = Arc::new(StaticArchive::default());
        let fetcher = Arc::new(MemoryFetcher::default());
        let options = SyncOptions {
            target: dir.path().join("mirrors"),
            version: "draft".to_string(),
            assetstore,
            download_base: Url::parse(BASE).unwrap(),
            jobs: 3,
            collection_jobs: 2,
        };
        let mirrorer = Mirrorer::new(archive.clone(), fetcher.clone(), options);
        Self {
            dir,
            archive,
            fetcher,
            mirrorer,
        }
    }

    pub fn mirror(&self, id: &str) -> PathBuf {
        self.mirrorer.mirror_path(&CollectionId::from(id))
    }

    /// Register `assets` for `id` and serve their bodies.
    pub fn publish(&self, id: &str, name: &str, assets: &[(&str, &[u8], i64)]) {
        let listing = assets
            .iter()
            .map(|(raw, body, secs)| {
                self.fetcher.serve(raw, body);
                asset(raw, body, *secs)
            })
            .collect();
        self.archive.set(id, record(name), listing);
    }
}

/// Relative paths of every regular file under `root`, skipping `.mirror`.
pub fn tree(root: &Path) -> Vec<String> {
    let mut out: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".mirror")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    out.sort();
    out
}
