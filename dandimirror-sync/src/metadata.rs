//! The collection's metadata record, kept as `dandiset.yaml` at the mirror root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dandimirror_core::{CollectionId, MetadataRecord};

use crate::error::{setup_err, SyncError};
use crate::fsutil;

pub const METADATA_FILE: &str = "dandiset.yaml";

pub fn record_path(root: &Path) -> PathBuf {
    root.join(METADATA_FILE)
}

/// Serialized form of the record, preceded by a do-not-edit header.
pub fn render_record(id: &CollectionId, record: &MetadataRecord) -> Result<String, SyncError> {
    let mut out = format!(
        "# DO NOT EDIT THIS FILE LOCALLY. ALL LOCAL UPDATES WILL BE LOST.\n\
         # It can be edited online at https://dandiarchive.org/dandiset/{id}\n\
         # and obtained from the dandiarchive.\n"
    );
    if !record.is_empty() {
        out.push_str(&serde_yaml::to_string(record)?);
    }
    Ok(out)
}

/// Replace the record wholesale. Failure here is a setup failure for the pass.
pub fn write_record(root: &Path, id: &CollectionId, record: &MetadataRecord) -> Result<(), SyncError> {
    let path = record_path(root);
    let rendered = render_record(id, record)?;
    fsutil::remove_if_exists(&path).map_err(|e| setup_err(&path, e))?;
    fsutil::atomic_write(&path, rendered.as_bytes()).map_err(|e| setup_err(&path, e))?;
    tracing::debug!(collection = %id, path = %path.display(), "wrote metadata record");
    Ok(())
}

/// Read back the record of an existing mirror, if it has one.
pub fn read_record(root: &Path) -> Result<Option<MetadataRecord>, SyncError> {
    let path = record_path(root);
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let has_body = contents
                .lines()
                .any(|line| !line.trim().is_empty() && !line.starts_with('#'));
            if !has_body {
                return Ok(Some(MetadataRecord::default()));
            }
            Ok(Some(serde_yaml::from_str(&contents)?))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(crate::error::io_err(&path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dandimirror_core::Metadata;
    use tempfile::TempDir;

    fn record() -> MetadataRecord {
        let mut fields = Metadata::new();
        fields.insert("identifier".into(), "DANDI:000027".into());
        fields.insert("name".into(), "Test Dandiset".into());
        MetadataRecord(fields)
    }

    #[test]
    fn rendered_record_carries_header() {
        let id = CollectionId::from("000027");
        let text = render_record(&id, &record()).unwrap();
        assert!(text.starts_with("# DO NOT EDIT THIS FILE LOCALLY."));
        assert!(text.contains("https://dandiarchive.org/dandiset/000027\n"));
        assert!(text.contains("name: Test Dandiset"));
    }

    #[test]
    fn write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let id = CollectionId::from("000027");
        write_record(dir.path(), &id, &record()).unwrap();
        let back = read_record(dir.path()).unwrap().unwrap();
        assert_eq!(back, record());
        assert_eq!(back.identifier().as_deref(), Some("000027"));
    }

    #[test]
    fn empty_record_reads_back_empty() {
        let dir = TempDir::new().unwrap();
        let id = CollectionId::from("000001");
        write_record(dir.path(), &id, &MetadataRecord::default()).unwrap();
        assert!(read_record(dir.path()).unwrap().unwrap().is_empty());
    }

    #[test]
    fn missing_record_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_record(dir.path()).unwrap().is_none());
    }

    #[test]
    fn write_replaces_local_edits() {
        let dir = TempDir::new().unwrap();
        let id = CollectionId::from("000027");
        std::fs::write(record_path(dir.path()), "hand edited: true\n").unwrap();
        write_record(dir.path(), &id, &record()).unwrap();
        let text = std::fs::read_to_string(record_path(dir.path())).unwrap();
        assert!(!text.contains("hand edited"));
    }
}
