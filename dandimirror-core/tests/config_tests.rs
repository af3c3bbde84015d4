//! Config error-message and atomic-save tests.

use assert_fs::prelude::*;
use dandimirror_core::{
    config::{self, MirrorConfig},
    ConfigError,
};
use predicates::prelude::predicate;
use std::path::PathBuf;

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".dandimirror/config.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "got: {err}");
}

#[test]
fn wrong_type_yaml_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".dandimirror/config.yaml")
        .write_str("- this is a list, not a mapping\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn empty_file_is_treated_as_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".dandimirror/config.yaml").touch().expect("touch");
    assert_eq!(config::load_at(home.path()).expect("load"), MirrorConfig::default());
}

#[test]
fn save_writes_yaml_with_owner_only_permissions() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let cfg = MirrorConfig {
        target: Some(PathBuf::from("/srv/dandisets")),
        ..MirrorConfig::default()
    };
    config::save_at(home.path(), &cfg).expect("save");

    let file = home.child(".dandimirror/config.yaml");
    file.assert(predicate::path::exists());
    file.assert(predicate::str::contains("target: /srv/dandisets"));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}

#[test]
fn save_refuses_invalid_config() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let cfg = MirrorConfig {
        collection_jobs: 0,
        ..MirrorConfig::default()
    };
    let err = config::save_at(home.path(), &cfg).unwrap_err();
    assert!(err.to_string().contains("collection_jobs"), "got: {err}");
    home.child(".dandimirror/config.yaml")
        .assert(predicate::path::missing());
}

#[test]
fn home_not_found_error_message() {
    assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
}
