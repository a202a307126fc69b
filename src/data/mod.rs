/// Data layer: traces, samples, datasets and their on-disk format.
///
/// Architecture:
/// ```text
///   dataset/
///   ├── dataset.json          {version, number_of_samples}
///   ├── 000000/
///   │   ├── sample.json       {version, traces: [...], extra: {...}}
///   │   ├── L1D.trace.parquet
///   │   └── L1I.trace.parquet
///   └── 000001/ ...
///
///   ┌─────────┐      ┌──────────┐      ┌─────────┐
///   │ Dataset │ ───▶ │  Sample  │ ───▶ │  Trace  │  rows × cols matrix
///   └─────────┘      └──────────┘      └─────────┘
/// ```
pub mod dataset;
pub mod export;
pub mod sample;
pub mod trace;

use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

pub use dataset::{Dataset, SharedDataset};
pub use sample::Sample;
pub use trace::{Dtype, Element, Trace, TraceValues};

/// Version string written into every descriptor. Loading compares for exact
/// equality; there is no migration path between versions.
pub const FORMAT_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Directory and descriptor helpers shared by the codecs
// ---------------------------------------------------------------------------

/// Create `path` as a directory for saving, refusing existing non-directories.
pub(crate) fn prepare_save_dir(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(Error::NotADirectory(path.to_path_buf()));
    }
    fs::create_dir_all(path)?;
    Ok(())
}

pub(crate) fn check_load_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(Error::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

pub(crate) fn write_descriptor<T: Serialize>(path: &Path, descriptor: &T) -> Result<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, descriptor)?;
    writer.flush()?;
    Ok(())
}

/// Read a JSON descriptor, checking its `version` field before decoding the
/// rest of it.
pub(crate) fn read_descriptor<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::MissingManifest(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    let root: JsonValue = serde_json::from_str(&text).map_err(|e| Error::format(path, e))?;

    let found = root
        .get("version")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| Error::format(path, "missing 'version' field"))?;
    if found != FORMAT_VERSION {
        return Err(Error::Version {
            path: path.to_path_buf(),
            found: found.to_string(),
            expected: FORMAT_VERSION.to_string(),
        });
    }

    serde_json::from_value(root).map_err(|e| Error::format(path, e))
}

/// Names that end up as file or directory names must stay inside their parent.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_with_separators_are_rejected() {
        assert!(validate_name("L1D").is_ok());
        assert!(validate_name("default_001").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(validate_name(bad), Err(Error::InvalidName(_))), "{bad}");
        }
    }

    #[test]
    fn descriptor_version_is_checked_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        std::fs::write(&path, r#"{"version": "9.9.9", "unrelated": true}"#).unwrap();

        let err = read_descriptor::<JsonValue>(&path).unwrap_err();
        assert!(matches!(err, Error::Version { ref found, .. } if found == "9.9.9"));
    }

    #[test]
    fn missing_descriptor_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_descriptor::<JsonValue>(&dir.path().join("dataset.json")).unwrap_err();
        assert!(matches!(err, Error::MissingManifest(_)));
    }

    #[test]
    fn garbage_descriptor_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            read_descriptor::<JsonValue>(&path),
            Err(Error::Format { .. })
        ));
    }
}
