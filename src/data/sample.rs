use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::trace::{Trace, TRACE_EXTENSION};
use super::{check_load_dir, prepare_save_dir, read_descriptor, validate_name, write_descriptor};
use super::FORMAT_VERSION;
use crate::error::Result;

/// Descriptor file written into every sample directory.
pub const SAMPLE_DESCRIPTOR: &str = "sample.json";

#[derive(Debug, Serialize, Deserialize)]
struct SampleDescriptor {
    version: String,
    traces: Vec<String>,
    #[serde(default)]
    extra: Map<String, JsonValue>,
}

// ---------------------------------------------------------------------------
// Sample – everything recorded by one capture
// ---------------------------------------------------------------------------

/// The data collected from a single capture: named traces plus free-form
/// JSON metadata ("extras") such as the command line or return code.
///
/// Traces keep their insertion order, which is also the order they are
/// written in. `Clone` is a deep copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    traces: Vec<(String, Trace)>,
    extra: Map<String, JsonValue>,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a trace, replacing (in place) any trace with the same name.
    pub fn add_trace(&mut self, name: impl Into<String>, trace: Trace) {
        let name = name.into();
        match self.traces.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = trace,
            None => self.traces.push((name, trace)),
        }
    }

    pub fn with_trace(mut self, name: impl Into<String>, trace: Trace) -> Self {
        self.add_trace(name, trace);
        self
    }

    pub fn trace(&self, name: &str) -> Option<&Trace> {
        self.traces.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn trace_mut(&mut self, name: &str) -> Option<&mut Trace> {
        self.traces
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn remove_trace(&mut self, name: &str) -> Option<Trace> {
        let idx = self.traces.iter().position(|(n, _)| n == name)?;
        Some(self.traces.remove(idx).1)
    }

    pub fn has_trace(&self, name: &str) -> bool {
        self.trace(name).is_some()
    }

    pub fn trace_names(&self) -> impl Iterator<Item = &str> {
        self.traces.iter().map(|(n, _)| n.as_str())
    }

    pub fn traces(&self) -> impl Iterator<Item = (&str, &Trace)> {
        self.traces.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn traces_mut(&mut self) -> impl Iterator<Item = (&str, &mut Trace)> {
        self.traces.iter_mut().map(|(n, t)| (n.as_str(), t))
    }

    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    /// Attach metadata. Anything convertible to a JSON value is accepted.
    pub fn add_extra(&mut self, tag: impl Into<String>, value: impl Into<JsonValue>) {
        self.extra.insert(tag.into(), value.into());
    }

    pub fn extra(&self, tag: &str) -> Option<&JsonValue> {
        self.extra.get(tag)
    }

    pub fn extras(&self) -> &Map<String, JsonValue> {
        &self.extra
    }

    /// Apply one row mask to every trace. All traces are checked before any
    /// is modified, so a row-count mismatch leaves the sample untouched.
    pub fn retain_rows(&mut self, mask: &[bool]) -> Result<()> {
        for (name, trace) in &self.traces {
            trace.check_mask(mask, name)?;
        }
        for (_, trace) in &mut self.traces {
            trace.retain_rows(mask)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Save to `dir`: one `<name>.trace.parquet` per trace, then `sample.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        for (name, _) in &self.traces {
            validate_name(name)?;
        }
        prepare_save_dir(dir)?;

        for (name, trace) in &self.traces {
            trace.save(&trace_path(dir, name))?;
        }

        let descriptor = SampleDescriptor {
            version: FORMAT_VERSION.to_string(),
            traces: self.traces.iter().map(|(n, _)| n.clone()).collect(),
            extra: self.extra.clone(),
        };
        write_descriptor(&dir.join(SAMPLE_DESCRIPTOR), &descriptor)
    }

    /// Load a sample written by [`Sample::save`].
    pub fn load(dir: &Path) -> Result<Sample> {
        check_load_dir(dir)?;
        let descriptor: SampleDescriptor = read_descriptor(&dir.join(SAMPLE_DESCRIPTOR))?;

        let mut sample = Sample::new();
        for name in descriptor.traces {
            validate_name(&name)?;
            let trace = Trace::load(&trace_path(dir, &name))?;
            sample.add_trace(name, trace);
        }
        sample.extra = descriptor.extra;
        Ok(sample)
    }
}

fn trace_path(dir: &Path, name: &str) -> std::path::PathBuf {
    dir.join(format!("{name}.{TRACE_EXTENSION}"))
}
