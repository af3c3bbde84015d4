//! User configuration for mirror runs.
//!
//! # Storage layout
//!
//! ```text
//! ~/.dandimirror/
//!   config.yaml   (mode 0600, optional)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_INSTANCE: &str = "dandi";
pub const DEFAULT_VERSION: &str = "draft";
pub const DEFAULT_JOBS: usize = 4;

// ---------------------------------------------------------------------------
// Known archive instances
// ---------------------------------------------------------------------------

/// A known archive deployment: REST API root plus the object-store base URL
/// that plain storage keys are resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub api: String,
    pub download_base: String,
}

pub fn known_instances() -> Vec<Instance> {
    vec![
        Instance {
            name: "dandi".to_string(),
            api: "https://api.dandiarchive.org/api".to_string(),
            download_base: "https://dandiarchive.s3.amazonaws.com/".to_string(),
        },
        Instance {
            name: "dandi-staging".to_string(),
            api: "https://api-staging.dandiarchive.org/api".to_string(),
            download_base: "https://dandi-api-staging-dandisets.s3.amazonaws.com/".to_string(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Config document
// ---------------------------------------------------------------------------

/// On-disk configuration. Every field is optional in YAML; CLI flags override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Name from [`known_instances`].
    pub instance: String,
    /// Overrides the instance's API root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// Overrides the instance's object-store base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_base_url: Option<String>,
    /// Collection version to mirror.
    pub version: String,
    /// Locally mounted replica of the archive's object store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assetstore: Option<PathBuf>,
    /// Directory holding one mirror per collection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
    /// Concurrent asset fetches within one collection.
    pub jobs: usize,
    /// Collections synced concurrently.
    pub collection_jobs: usize,
    /// Exit successfully even when individual assets fail.
    pub ignore_errors: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            instance: DEFAULT_INSTANCE.to_string(),
            api_url: None,
            download_base_url: None,
            version: DEFAULT_VERSION.to_string(),
            assetstore: None,
            target: None,
            jobs: DEFAULT_JOBS,
            collection_jobs: 1,
            ignore_errors: false,
        }
    }
}

impl MirrorConfig {
    /// Resolve the effective instance, applying URL overrides.
    ///
    /// An unknown instance name is accepted only when both URLs are overridden.
    pub fn resolve_instance(&self) -> Result<Instance, ConfigError> {
        let known = known_instances()
            .into_iter()
            .find(|i| i.name == self.instance);
        match (known, &self.api_url, &self.download_base_url) {
            (Some(mut instance), api, base) => {
                if let Some(api) = api {
                    instance.api = api.clone();
                }
                if let Some(base) = base {
                    instance.download_base = base.clone();
                }
                Ok(instance)
            }
            (None, Some(api), Some(base)) => Ok(Instance {
                name: self.instance.clone(),
                api: api.clone(),
                download_base: base.clone(),
            }),
            (None, _, _) => Err(ConfigError::UnknownInstance(self.instance.clone())),
        }
    }

    /// Reject values the sync engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == 0 {
            return Err(ConfigError::Invalid {
                field: "jobs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.collection_jobs == 0 {
            return Err(ConfigError::Invalid {
                field: "collection_jobs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "version",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.dandimirror/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".dandimirror").join("config.yaml")
}

/// Load the config, returning defaults if the file does not exist.
pub fn load_at(home: &Path) -> Result<MirrorConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(MirrorConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(MirrorConfig::default());
    }
    let config: MirrorConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<MirrorConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the config.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &MirrorConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let path = config_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &MirrorConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(config_path_at(home.path()).ends_with(".dandimirror/config.yaml"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().expect("tempdir");
        let config = load_at(home.path()).expect("load");
        assert_eq!(config, MirrorConfig::default());
        assert_eq!(config.version, "draft");
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        let config = MirrorConfig {
            assetstore: Some(PathBuf::from("/mnt/backup/dandi/dandiarchive")),
            target: Some(PathBuf::from("/mnt/backup/dandi/dandisets")),
            jobs: 8,
            ..MirrorConfig::default()
        };
        save_at(home.path(), &config).expect("save");
        assert_eq!(load_at(home.path()).expect("load"), config);

        let tmp = config_path_at(home.path()).with_extension("yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let home = TempDir::new().expect("tempdir");
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "jobs: 2\n").unwrap();
        let config = load_at(home.path()).expect("load");
        assert_eq!(config.jobs, 2);
        assert_eq!(config.instance, DEFAULT_INSTANCE);
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let home = TempDir::new().expect("tempdir");
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "jobs: [unterminated\n").unwrap();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn zero_jobs_is_rejected() {
        let config = MirrorConfig {
            jobs: 0,
            ..MirrorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "jobs", .. })
        ));
    }

    #[test]
    fn instance_overrides_apply() {
        let config = MirrorConfig {
            api_url: Some("http://localhost:8000/api".to_string()),
            ..MirrorConfig::default()
        };
        let instance = config.resolve_instance().expect("resolve");
        assert_eq!(instance.api, "http://localhost:8000/api");
        assert_eq!(instance.download_base, "https://dandiarchive.s3.amazonaws.com/");
    }

    #[test]
    fn unknown_instance_requires_both_urls() {
        let mut config = MirrorConfig {
            instance: "local".to_string(),
            api_url: Some("http://localhost:8000/api".to_string()),
            ..MirrorConfig::default()
        };
        assert!(matches!(
            config.resolve_instance(),
            Err(ConfigError::UnknownInstance(_))
        ));
        config.download_base_url = Some("http://localhost:9000/".to_string());
        assert_eq!(config.resolve_instance().expect("resolve").name, "local");
    }
}
