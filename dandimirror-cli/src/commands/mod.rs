pub mod diff;
pub mod instances;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use dandimirror_core::{config, CollectionId, MirrorConfig};
use dandimirror_sync::{DandiApiClient, HttpFetcher, Mirrorer, SyncOptions};

/// Flags shared by commands that talk to the archive. Each overrides the
/// matching field of `~/.dandimirror/config.yaml`.
#[derive(Args, Debug, Default, Clone)]
pub struct ArchiveArgs {
    /// Directory holding one mirror per collection [default: current directory].
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Locally mounted replica of the archive's object store.
    #[arg(long)]
    pub assetstore: Option<PathBuf>,

    /// Archive instance name (see `dandimirror instances`).
    #[arg(long)]
    pub instance: Option<String>,

    /// Collection version to mirror.
    #[arg(long)]
    pub version: Option<String>,
}

impl ArchiveArgs {
    fn apply(&self, config: &mut MirrorConfig) {
        if let Some(target) = &self.target {
            config.target = Some(target.clone());
        }
        if let Some(assetstore) = &self.assetstore {
            config.assetstore = Some(assetstore.clone());
        }
        if let Some(instance) = &self.instance {
            config.instance = instance.clone();
        }
        if let Some(version) = &self.version {
            config.version = version.clone();
        }
    }
}

/// Config file values with CLI overrides applied.
pub fn load_config(archive: &ArchiveArgs) -> Result<MirrorConfig> {
    let mut config = config::load().context("failed to load ~/.dandimirror/config.yaml")?;
    archive.apply(&mut config);
    Ok(config)
}

pub fn target_dir(config: &MirrorConfig) -> Result<PathBuf> {
    match &config.target {
        Some(target) => Ok(target.clone()),
        None => std::env::current_dir().context("could not determine current directory"),
    }
}

pub fn build_mirrorer(config: &MirrorConfig) -> Result<Mirrorer> {
    let instance = config.resolve_instance()?;
    let options = SyncOptions::from_config(config, &instance, target_dir(config)?)?;
    let client = reqwest::Client::builder()
        .user_agent(concat!("dandimirror/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let archive = DandiApiClient::for_instance(client.clone(), &instance)?;
    tracing::debug!(instance = %instance.name, api = %instance.api, "using archive");
    Ok(Mirrorer::new(
        Arc::new(archive),
        Arc::new(HttpFetcher::new(client)),
        options,
    ))
}

/// Accept both `000027` and `DANDI:000027`.
pub fn parse_collection_id(raw: &str) -> CollectionId {
    CollectionId::from(raw.strip_prefix("DANDI:").unwrap_or(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_ids_accept_prefix() {
        assert_eq!(parse_collection_id("DANDI:000027").0, "000027");
        assert_eq!(parse_collection_id("000027").0, "000027");
    }

    #[test]
    fn flags_override_config() {
        let mut config = MirrorConfig::default();
        let args = ArchiveArgs {
            instance: Some("dandi-staging".into()),
            version: Some("0.210812.1448".into()),
            ..Default::default()
        };
        args.apply(&mut config);
        assert_eq!(config.instance, "dandi-staging");
        assert_eq!(config.version, "0.210812.1448");
        assert_eq!(config.target, None);
    }
}
