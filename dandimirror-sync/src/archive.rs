//! Archive client: enumerate collections, list assets, fetch metadata records.
//!
//! [`Archive`] is the seam the pipeline consumes; [`DandiApiClient`] speaks the
//! DANDI REST API over an explicitly passed `reqwest::Client`.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use dandimirror_core::{
    AssetPath, CollectionId, Instance, Metadata, MetadataRecord, RemoteAsset, Timestamp,
};

const PAGE_SIZE: u32 = 100;
const SHA256_DIGEST: &str = "dandi:sha2-256";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("invalid archive URL '{0}'")]
    Url(String),

    #[error("collection {0} not found")]
    NotFound(CollectionId),

    #[error("archive returned an unusable asset '{path}': {reason}")]
    InvalidAsset { path: String, reason: String },
}

/// Read-only view of a remote archive.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Every collection id, fetched lazily page by page.
    fn list_collections(&self) -> BoxStream<'_, Result<CollectionId, ArchiveError>>;

    async fn list_assets(
        &self,
        id: &CollectionId,
        version: &str,
    ) -> Result<Vec<RemoteAsset>, ArchiveError>;

    async fn collection_metadata(
        &self,
        id: &CollectionId,
        version: &str,
    ) -> Result<MetadataRecord, ArchiveError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApiCollection {
    identifier: String,
}

/// One entry of the version asset listing, requested with `metadata=1`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiAsset {
    pub asset_id: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub blob: Option<String>,
    #[serde(default)]
    pub zarr: Option<String>,
    #[serde(default)]
    pub modified: Option<Timestamp>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DandiApiClient {
    client: Client,
    api: Url,
}

impl DandiApiClient {
    pub fn new(client: Client, api_url: &str) -> Result<Self, ArchiveError> {
        let mut raw = api_url.to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let api = Url::parse(&raw).map_err(|_| ArchiveError::Url(api_url.to_string()))?;
        Ok(Self { client, api })
    }

    pub fn for_instance(client: Client, instance: &Instance) -> Result<Self, ArchiveError> {
        Self::new(client, &instance.api)
    }

    pub fn api_url(&self) -> &Url {
        &self.api
    }

    fn endpoint(&self, path: &str) -> Result<Url, ArchiveError> {
        self.api
            .join(path)
            .map_err(|_| ArchiveError::Url(format!("{}{path}", self.api)))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ArchiveError> {
        tracing::debug!(url = %url, "GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| ArchiveError::Http {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.json::<T>().await.map_err(|source| ArchiveError::Http {
            url: url.to_string(),
            source,
        })
    }

    async fn get_all<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>, ArchiveError> {
        let mut out = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            let page: Page<T> = self.get_json(url).await?;
            out.extend(page.results);
            next = page
                .next
                .map(|n| Url::parse(&n).map_err(|_| ArchiveError::Url(n)))
                .transpose()?;
        }
        Ok(out)
    }

    fn not_found(id: &CollectionId) -> impl Fn(ArchiveError) -> ArchiveError + '_ {
        move |err| match err {
            ArchiveError::Status { status: 404, .. } => ArchiveError::NotFound(id.clone()),
            other => other,
        }
    }
}

#[async_trait]
impl Archive for DandiApiClient {
    fn list_collections(&self) -> BoxStream<'_, Result<CollectionId, ArchiveError>> {
        let first = self
            .endpoint(&format!("dandisets/?page_size={PAGE_SIZE}&ordering=identifier"))
            .map(Some);
        let pages = stream::try_unfold(first, move |state| async move {
            let Some(url) = state? else {
                return Ok(None);
            };
            let page: Page<ApiCollection> = self.get_json(url).await?;
            let next = page
                .next
                .map(|n| Url::parse(&n).map_err(|_| ArchiveError::Url(n)))
                .transpose();
            let ids: Vec<Result<CollectionId, ArchiveError>> = page
                .results
                .into_iter()
                .map(|c| Ok(CollectionId::from(c.identifier)))
                .collect();
            Ok::<_, ArchiveError>(Some((stream::iter(ids), next)))
        });
        pages
            .map(|page| match page {
                Ok(ids) => ids.boxed(),
                Err(err) => stream::once(async move { Err(err) }).boxed(),
            })
            .flatten()
            .boxed()
    }

    async fn list_assets(
        &self,
        id: &CollectionId,
        version: &str,
    ) -> Result<Vec<RemoteAsset>, ArchiveError> {
        let url = self.endpoint(&format!(
            "dandisets/{id}/versions/{version}/assets/?page_size={PAGE_SIZE}&metadata=1&order=path"
        ))?;
        let raw: Vec<ApiAsset> = self.get_all(url).await.map_err(Self::not_found(id))?;
        let assets = assets_from_api(raw, &self.api);
        tracing::info!(collection = %id, version, count = assets.len(), "listed assets");
        Ok(assets)
    }

    async fn collection_metadata(
        &self,
        id: &CollectionId,
        version: &str,
    ) -> Result<MetadataRecord, ArchiveError> {
        let url = self.endpoint(&format!("dandisets/{id}/versions/{version}/"))?;
        let fields: Metadata = self.get_json(url).await.map_err(Self::not_found(id))?;
        Ok(MetadataRecord(fields))
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Map a whole listing, skipping entries that cannot be mirrored.
///
/// A malformed entry never hides its siblings.
pub fn assets_from_api(raw: Vec<ApiAsset>, api: &Url) -> Vec<RemoteAsset> {
    let mut assets = Vec::with_capacity(raw.len());
    for item in raw {
        match asset_from_api(item, api) {
            Ok(Some(asset)) => assets.push(asset),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "skipping unusable archive asset"),
        }
    }
    assets
}

/// Turn one listing entry into a [`RemoteAsset`].
///
/// Zarr-backed assets have no single blob and are skipped (`Ok(None)`).
pub fn asset_from_api(raw: ApiAsset, api: &Url) -> Result<Option<RemoteAsset>, ArchiveError> {
    if raw.blob.is_none() && raw.zarr.is_some() {
        tracing::warn!(path = %raw.path, "skipping zarr asset");
        return Ok(None);
    }
    let path = AssetPath::parse(&raw.path).map_err(|e| ArchiveError::InvalidAsset {
        path: raw.path.clone(),
        reason: e.to_string(),
    })?;
    let metadata = raw.metadata.unwrap_or_default();

    let content_hash = metadata
        .get("digest")
        .and_then(|d| d.get(SHA256_DIGEST))
        .and_then(|v| v.as_str())
        .map(|h| h.to_ascii_lowercase());

    let modified_at = metadata
        .get("blobDateModified")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .or(raw.modified);

    let size = metadata
        .get("contentSize")
        .and_then(|v| v.as_u64())
        .unwrap_or(raw.size);

    let storage_key = metadata
        .get("contentUrl")
        .and_then(|v| v.as_array())
        .and_then(|urls| {
            urls.iter()
                .filter_map(|u| u.as_str())
                .find(|u| is_object_store_url(u))
                .map(str::to_string)
        });
    let storage_key = match storage_key {
        Some(key) => key,
        None => api
            .join(&format!("assets/{}/download/", raw.asset_id))
            .map_err(|e| ArchiveError::InvalidAsset {
                path: raw.path.clone(),
                reason: e.to_string(),
            })?
            .to_string(),
    };

    Ok(Some(RemoteAsset {
        path,
        storage_key,
        content_hash,
        size,
        modified_at,
        metadata,
    }))
}

fn is_object_store_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.ends_with(".amazonaws.com")))
        .unwrap_or(false)
}
