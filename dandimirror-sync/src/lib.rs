//! # dandimirror-sync
//!
//! Reconciliation engine that keeps one local versioned mirror per archive
//! collection.
//!
//! Call [`Mirrorer::sync_collection`] for a single collection, or
//! [`Mirrorer::sync_many`] / [`Mirrorer::sync_all`] for batches.
//!
//! - [`diff`]: classify remote assets and local files into actions
//! - [`resolver`]: materialize content from the object cache or network
//! - [`writer`]: apply an action plan to a mirror
//! - [`commit`]: snapshot with a deterministic author timestamp
//! - [`store`]: the content-addressed versioned store under `.mirror/`

pub mod archive;
pub mod cancel;
pub mod commit;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod locator;
pub mod lock;
pub mod metadata;
pub mod pipeline;
pub mod resolver;
pub mod status;
pub mod store;
pub mod writer;

pub use archive::{Archive, ArchiveError, DandiApiClient};
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use diff::{ActionPlan, SyncAction};
pub use error::{AssetErrorKind, AssetSyncError, SyncError};
pub use fetch::{ByteStream, FetchError, Fetcher, HttpFetcher};
pub use pipeline::{CollectionPlan, ExitStatus, Mirrorer, SyncOptions, SyncResult};
pub use resolver::{ContentSource, Verification};
pub use status::{mirror_status, MirrorStatus};
pub use writer::{SyncedAsset, WeakVerificationNotice};
