use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::sample::Sample;
use super::{check_load_dir, prepare_save_dir, read_descriptor, write_descriptor, FORMAT_VERSION};
use crate::error::{Error, Result};

/// Manifest file at the root of a dataset directory.
pub const DATASET_MANIFEST: &str = "dataset.json";

/// A dataset that is read and appended to by several pipeline endpoints.
pub type SharedDataset = Rc<RefCell<Dataset>>;

#[derive(Debug, Serialize, Deserialize)]
struct DatasetManifest {
    version: String,
    number_of_samples: usize,
}

/// Sample directories are six zero-padded digits so lexical order is index order.
pub fn sample_dir_name(index: usize) -> String {
    format!("{index:06}")
}

// ---------------------------------------------------------------------------
// Dataset – ordered, append-only collection of samples
// ---------------------------------------------------------------------------

/// An ordered collection of samples. Indices are dense and stable because
/// samples can only be appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the dataset so it can back a source and a sink at the same time.
    pub fn shared(self) -> SharedDataset {
        Rc::new(RefCell::new(self))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample and return its index.
    pub fn push(&mut self, sample: Sample) -> usize {
        self.samples.push(sample);
        let index = self.samples.len() - 1;
        debug!("dataset: appended sample {index}");
        index
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Save the dataset to `dir`.
    ///
    /// The tree is first written to a hidden sibling `.<name>.partial` and
    /// renamed into place once complete. An existing dataset at `dir` is moved
    /// aside to `.<name>.old` and only removed after the new tree is in place.
    /// A non-empty directory without a `dataset.json` is never replaced.
    /// A failed save leaves whatever was at `dir` before untouched.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let occupied = if dir.exists() {
            if !dir.is_dir() {
                return Err(Error::NotADirectory(dir.to_path_buf()));
            }
            if !dir.join(DATASET_MANIFEST).is_file() && fs::read_dir(dir)?.next().is_some() {
                return Err(Error::Occupied(dir.to_path_buf()));
            }
            true
        } else {
            false
        };
        let (Some(staging), Some(previous)) = (sibling(dir, "partial"), sibling(dir, "old")) else {
            // No file name to stage next to (e.g. "/"): write in place.
            return self.write_tree(dir);
        };

        for leftover in [&staging, &previous] {
            if leftover.exists() {
                fs::remove_dir_all(leftover)?;
            }
        }
        if let Err(e) = self.write_tree(&staging) {
            discard(&staging);
            return Err(e);
        }

        if occupied {
            if let Err(e) = fs::rename(dir, &previous) {
                discard(&staging);
                return Err(e.into());
            }
        }
        if let Err(e) = fs::rename(&staging, dir) {
            if occupied {
                if let Err(restore) = fs::rename(&previous, dir) {
                    warn!("could not restore {}: {restore}", dir.display());
                }
            }
            discard(&staging);
            return Err(e.into());
        }
        if occupied {
            discard(&previous);
        }
        info!("saved {} samples to {}", self.len(), dir.display());
        Ok(())
    }

    fn write_tree(&self, dir: &Path) -> Result<()> {
        prepare_save_dir(dir)?;
        for (i, sample) in self.samples.iter().enumerate() {
            sample.save(&dir.join(sample_dir_name(i)))?;
        }
        let manifest = DatasetManifest {
            version: FORMAT_VERSION.to_string(),
            number_of_samples: self.samples.len(),
        };
        write_descriptor(&dir.join(DATASET_MANIFEST), &manifest)
    }

    /// Load a dataset written by [`Dataset::save`] into a fresh instance.
    pub fn load(dir: &Path) -> Result<Dataset> {
        check_load_dir(dir)?;
        let manifest: DatasetManifest = read_descriptor(&dir.join(DATASET_MANIFEST))?;

        let mut dataset = Dataset::new();
        for i in 0..manifest.number_of_samples {
            dataset.push(Sample::load(&dir.join(sample_dir_name(i)))?);
        }
        info!("loaded {} samples from {}", dataset.len(), dir.display());
        Ok(dataset)
    }
}

impl Extend<Sample> for Dataset {
    fn extend<I: IntoIterator<Item = Sample>>(&mut self, iter: I) {
        for sample in iter {
            self.push(sample);
        }
    }
}

impl FromIterator<Sample> for Dataset {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Dataset {
            samples: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Hidden sibling `.<name>.<suffix>` used while replacing `dir`.
fn sibling(dir: &Path, suffix: &str) -> Option<PathBuf> {
    let name = dir.file_name()?;
    let mut staged = OsString::from(".");
    staged.push(name);
    staged.push(".");
    staged.push(suffix);
    Some(dir.with_file_name(staged))
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!("could not remove {}: {e}", dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Trace;

    fn identity(n: usize) -> Trace {
        let mut data = vec![0.0f64; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Trace::new(n, n, data).unwrap()
    }

    fn two_samples() -> Dataset {
        let first = Sample::new()
            .with_trace("test", identity(5))
            .with_trace("test2", identity(5));
        let mut second = Sample::new().with_trace("test3", identity(5));
        second.add_extra("time_delta", 3000);
        [first, second].into_iter().collect()
    }

    #[test]
    fn push_returns_dense_indices() {
        let mut ds = Dataset::new();
        assert_eq!(ds.push(Sample::new()), 0);
        assert_eq!(ds.push(Sample::new()), 1);
        assert_eq!(ds.len(), 2);
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn save_writes_manifest_and_numbered_dirs() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ds");
        two_samples().save(&dir).unwrap();

        assert!(dir.join(DATASET_MANIFEST).is_file());
        assert!(dir.join("000000").join("sample.json").is_file());
        assert!(dir.join("000001").join("test3.trace.parquet").is_file());
        assert!(!root.path().join(".ds.partial").exists());

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(DATASET_MANIFEST)).unwrap())
                .unwrap();
        assert_eq!(manifest["number_of_samples"], 2);
        assert_eq!(manifest["version"], FORMAT_VERSION);
    }

    #[test]
    fn round_trip_is_exact() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ds");
        let ds = two_samples();
        ds.save(&dir).unwrap();
        assert_eq!(Dataset::load(&dir).unwrap(), ds);
    }

    #[test]
    fn saving_over_an_existing_dataset_replaces_it() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ds");
        two_samples().save(&dir).unwrap();

        let smaller: Dataset = [Sample::new().with_trace("only", identity(2))]
            .into_iter()
            .collect();
        smaller.save(&dir).unwrap();

        assert!(!dir.join("000001").exists());
        assert!(!root.path().join(".ds.old").exists());
        assert_eq!(Dataset::load(&dir).unwrap(), smaller);
    }

    #[test]
    fn unrelated_directories_are_not_replaced() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("notes");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("notes.txt"), "keep me").unwrap();

        assert!(matches!(two_samples().save(&dir), Err(Error::Occupied(_))));
        assert_eq!(fs::read_to_string(dir.join("notes.txt")).unwrap(), "keep me");
        assert!(!root.path().join(".notes.partial").exists());
    }

    #[test]
    fn empty_directories_are_filled() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ds");
        fs::create_dir(&dir).unwrap();
        two_samples().save(&dir).unwrap();
        assert_eq!(Dataset::load(&dir).unwrap(), two_samples());
    }

    #[test]
    fn stale_staging_leftovers_are_cleared() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ds");
        fs::create_dir_all(root.path().join(".ds.partial").join("junk")).unwrap();
        fs::create_dir_all(root.path().join(".ds.old")).unwrap();
        two_samples().save(&dir).unwrap();
        assert!(!root.path().join(".ds.partial").exists());
        assert!(!root.path().join(".ds.old").exists());
        assert_eq!(Dataset::load(&dir).unwrap().len(), 2);
    }

    #[test]
    fn failed_save_keeps_previous_contents() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ds");
        let original = two_samples();
        original.save(&dir).unwrap();

        let bad: Dataset = [Sample::new().with_trace("a/b", identity(1))]
            .into_iter()
            .collect();
        assert!(matches!(bad.save(&dir), Err(Error::InvalidName(_))));
        assert!(!root.path().join(".ds.partial").exists());
        assert_eq!(Dataset::load(&dir).unwrap(), original);
    }

    #[test]
    fn load_errors_are_distinct() {
        let root = tempfile::tempdir().unwrap();

        let file = root.path().join("file");
        fs::write(&file, b"").unwrap();
        assert!(matches!(Dataset::save(&Dataset::new(), &file), Err(Error::NotADirectory(_))));
        assert!(matches!(Dataset::load(&file), Err(Error::NotADirectory(_))));

        assert!(matches!(
            Dataset::load(&root.path().join("missing")),
            Err(Error::NotFound(_))
        ));

        let empty = root.path().join("empty");
        fs::create_dir(&empty).unwrap();
        assert!(matches!(Dataset::load(&empty), Err(Error::MissingManifest(_))));
    }

    #[test]
    fn version_mismatch_is_a_hard_error() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ds");
        two_samples().save(&dir).unwrap();
        fs::write(
            dir.join(DATASET_MANIFEST),
            r#"{"version": "0.2.0", "number_of_samples": 2}"#,
        )
        .unwrap();

        let mut held = Dataset::new();
        held.push(Sample::new());
        let before = held.clone();

        let err = Dataset::load(&dir).unwrap_err();
        assert!(matches!(err, Error::Version { ref found, .. } if found == "0.2.0"));
        assert_eq!(held, before);
    }

    #[test]
    fn missing_sample_directory_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ds");
        two_samples().save(&dir).unwrap();
        fs::remove_dir_all(dir.join("000001")).unwrap();
        assert!(matches!(Dataset::load(&dir), Err(Error::NotFound(_))));
    }
}
