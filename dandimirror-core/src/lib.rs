//! dandimirror core library: domain types, configuration, errors.
//!
//! - [`types`]: collection/asset newtypes and records
//! - [`config`]: `~/.dandimirror/config.yaml` and known archive instances
//! - [`error`]: [`ConfigError`], [`AssetPathError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Instance, MirrorConfig};
pub use error::{AssetPathError, ConfigError};
pub use types::{
    AssetPath, CollectionId, LocalFile, Metadata, MetadataRecord, RemoteAsset, Timestamp,
};
