//! A working session: named datasets plus the two pipelines around them.
//!
//! ```text
//!   capture source ─▶ collection filters ─▶ ┌────────────────┐
//!                                           │ active dataset │
//!   analysis sink ◀─ analysis filters ◀──── └────────────────┘
//! ```
//!
//! Activating a dataset rewires both pipelines to it. On disk a workspace is
//! a directory holding `environment.json` and one dataset directory per name.

use std::path::Path;
use std::rc::Rc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::data::{
    check_load_dir, prepare_save_dir, read_descriptor, validate_name, write_descriptor, Dataset,
    Sample, SharedDataset, FORMAT_VERSION,
};
use crate::error::{Error, Result};
use crate::filters::load_filter;
use crate::pipeline::Pipeline;
use crate::sinks::{load_sink, DatasetSink, SummarySink};
use crate::sources::{DatasetSource, Source};

pub const WORKSPACE_DESCRIPTOR: &str = "environment.json";

/// Name given to a dataset added without one, and to the dataset that
/// replaces the last removed one.
pub const DEFAULT_DATASET: &str = "default";

/// Which sample of the active dataset the preview analyzes.
///
/// Saved as `null`, `-2` (latest) or the sample index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<i64>", into = "Option<i64>")]
pub enum PreviewFocus {
    #[default]
    Nothing,
    /// Whatever sample was appended last.
    Latest,
    Index(usize),
}

impl From<Option<i64>> for PreviewFocus {
    fn from(raw: Option<i64>) -> Self {
        match raw {
            None => PreviewFocus::Nothing,
            Some(i) if i >= 0 => PreviewFocus::Index(i as usize),
            Some(_) => PreviewFocus::Latest,
        }
    }
}

impl From<PreviewFocus> for Option<i64> {
    fn from(focus: PreviewFocus) -> Self {
        match focus {
            PreviewFocus::Nothing => None,
            PreviewFocus::Latest => Some(-2),
            PreviewFocus::Index(i) => Some(i as i64),
        }
    }
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkspaceDescriptor {
    version: String,
    datasets: Vec<String>,
    /// Empty when no dataset is active.
    #[serde(default)]
    active_dataset: String,
    /// Capture source description, if one was ever set.
    #[serde(default)]
    source: Option<JsonValue>,
    #[serde(default)]
    analyzer: Option<JsonValue>,
    #[serde(default)]
    collection_filters: Vec<JsonValue>,
    #[serde(default)]
    analysis_filters: Vec<JsonValue>,
    #[serde(default = "enabled")]
    preview_analysis: bool,
    #[serde(default)]
    preview_sample: PreviewFocus,
}

pub struct Workspace {
    datasets: Vec<(String, SharedDataset)>,
    active: Option<String>,
    collection: Pipeline,
    analysis: Pipeline,
    /// Loaded source description waiting for [`Workspace::restore_capture_source`].
    saved_source: Option<JsonValue>,
    preview_analysis: bool,
    preview_focus: PreviewFocus,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    /// An empty workspace with a single active `default` dataset. The
    /// analysis pipeline ends in a [`SummarySink`]; the collection pipeline
    /// has no capture source until one is set.
    pub fn new() -> Self {
        let mut workspace = Self::bare();
        workspace.ensure_default();
        workspace
    }

    fn bare() -> Self {
        let mut analysis = Pipeline::new();
        analysis.set_sink(Box::new(SummarySink::new()));
        Self {
            datasets: Vec::new(),
            active: None,
            collection: Pipeline::new(),
            analysis,
            saved_source: None,
            preview_analysis: true,
            preview_focus: PreviewFocus::Nothing,
        }
    }

    fn ensure_default(&mut self) {
        if self.datasets.is_empty() {
            self.datasets
                .push((DEFAULT_DATASET.to_string(), Dataset::new().shared()));
            self.wire(Some(DEFAULT_DATASET.to_string()));
        }
    }

    // -----------------------------------------------------------------------
    // Datasets
    // -----------------------------------------------------------------------

    pub fn dataset_count(&self) -> usize {
        self.datasets.len()
    }

    /// Dataset names in insertion order.
    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(|(n, _)| n.as_str())
    }

    pub fn dataset(&self, name: &str) -> Option<&SharedDataset> {
        self.datasets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ds)| ds)
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.datasets
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::UnknownDataset(name.to_string()))
    }

    /// `name` if free, otherwise the first free `name_001`, `name_002`, …
    fn unique_name(&self, name: &str) -> String {
        if self.dataset(name).is_none() {
            return name.to_string();
        }
        (1..)
            .map(|i| format!("{name}_{i:03}"))
            .find(|candidate| self.dataset(candidate).is_none())
            .unwrap_or_else(|| name.to_string())
    }

    /// Add a dataset under `name` (or `default` when empty) and return the
    /// name it was actually stored under.
    pub fn add_dataset(&mut self, dataset: Dataset, name: &str) -> Result<String> {
        let name = if name.is_empty() { DEFAULT_DATASET } else { name };
        validate_dataset_name(name)?;
        let name = self.unique_name(name);
        info!("workspace: added dataset '{name}' ({} samples)", dataset.len());
        self.datasets.push((name.clone(), dataset.shared()));
        Ok(name)
    }

    /// Rename keeping the dataset's position. Returns the name actually used.
    pub fn rename_dataset(&mut self, old: &str, new: &str) -> Result<String> {
        let index = self.position(old)?;
        let new = if new.is_empty() { DEFAULT_DATASET } else { new };
        if old == new {
            return Ok(old.to_string());
        }
        validate_dataset_name(new)?;

        let (_, dataset) = self.datasets.remove(index);
        let unique = self.unique_name(new);
        self.datasets.insert(index, (unique.clone(), dataset));
        if self.active.as_deref() == Some(old) {
            self.active = Some(unique.clone());
        }
        info!("workspace: renamed dataset '{old}' to '{unique}'");
        Ok(unique)
    }

    /// Remove a dataset. Removing the active one deactivates it; removing the
    /// last one brings back an empty, active `default`.
    pub fn remove_dataset(&mut self, name: &str) -> Result<SharedDataset> {
        let index = self.position(name)?;
        let (_, dataset) = self.datasets.remove(index);
        if self.active.as_deref() == Some(name) {
            self.wire(None);
        }
        self.ensure_default();
        info!("workspace: removed dataset '{name}'");
        Ok(dataset)
    }

    /// Make `name` the active dataset, or deactivate with `None`.
    pub fn activate(&mut self, name: Option<&str>) -> Result<()> {
        if let Some(name) = name {
            self.position(name)?;
        }
        self.wire(name.map(str::to_string));
        Ok(())
    }

    /// Point the collection sink and the analysis source at the dataset, and
    /// move the preview focus to its latest sample.
    fn wire(&mut self, name: Option<String>) {
        let dataset = name.as_deref().and_then(|n| self.dataset(n)).cloned();
        match dataset {
            Some(ds) => {
                self.collection
                    .set_sink(Box::new(DatasetSink::new(Rc::clone(&ds))));
                self.analysis.set_source(Box::new(DatasetSource::new(ds)));
                info!("workspace: activated '{}'", name.as_deref().unwrap_or_default());
                self.active = name;
                self.preview_focus = PreviewFocus::Latest;
            }
            None => {
                self.collection.take_sink();
                self.analysis.take_source();
                self.active = None;
                self.preview_focus = PreviewFocus::Nothing;
            }
        }
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_dataset(&self) -> Option<&SharedDataset> {
        self.active.as_deref().and_then(|n| self.dataset(n))
    }

    // -----------------------------------------------------------------------
    // Pipelines
    // -----------------------------------------------------------------------

    pub fn collection_pipeline(&self) -> &Pipeline {
        &self.collection
    }

    /// For editing the collection filters. Its sink belongs to the workspace
    /// and is replaced on every activation.
    pub fn collection_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.collection
    }

    pub fn analysis_pipeline(&self) -> &Pipeline {
        &self.analysis
    }

    pub fn analysis_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.analysis
    }

    pub fn set_capture_source(&mut self, source: Box<dyn Source>) {
        self.saved_source = None;
        self.collection.set_source(source);
    }

    /// Install `source` after configuring it from the description saved with
    /// this workspace, if there is one.
    pub fn restore_capture_source(&mut self, mut source: Box<dyn Source>) -> Result<()> {
        if let Some(desc) = &self.saved_source {
            source.load(desc)?;
        }
        self.set_capture_source(source);
        Ok(())
    }

    /// Description of the capture source, live or as loaded.
    pub fn capture_source_description(&self) -> Result<Option<JsonValue>> {
        match self.collection.source() {
            Some(source) => source.save().map(Some),
            None => Ok(self.saved_source.clone()),
        }
    }

    /// Capture into the active dataset.
    pub fn collect(&mut self, limit: Option<usize>) -> Result<usize> {
        self.collection.run(limit)
    }

    /// Run the active dataset through the analysis pipeline.
    pub fn analyze(&mut self, limit: Option<usize>) -> Result<usize> {
        self.analysis.run(limit)
    }

    /// Copy of sample `index` of the active dataset, or of its most recent
    /// sample when `index` is `None`.
    pub fn preview_sample(&self, index: Option<usize>) -> Option<Sample> {
        let dataset = self.active_dataset()?.borrow();
        match index {
            Some(i) => dataset.get(i).cloned(),
            None => dataset.last().cloned(),
        }
    }

    /// Analyze a single sample (see [`Workspace::preview_sample`]) without
    /// touching the dataset. Returns 0 when there is nothing to preview.
    pub fn preview(&mut self, index: Option<usize>) -> Result<usize> {
        match self.preview_sample(index) {
            Some(sample) => self.analysis.run_samples([sample]),
            None => Ok(0),
        }
    }

    pub fn preview_analysis(&self) -> bool {
        self.preview_analysis
    }

    /// Turning the preview on or off clears the focus.
    pub fn set_preview_analysis(&mut self, enabled: bool) {
        self.preview_analysis = enabled;
        self.preview_focus = PreviewFocus::Nothing;
    }

    pub fn preview_focus(&self) -> PreviewFocus {
        self.preview_focus
    }

    pub fn set_preview_focus(&mut self, focus: PreviewFocus) {
        self.preview_focus = focus;
    }

    /// Preview the focused sample when previews are on.
    pub fn refresh_preview(&mut self) -> Result<usize> {
        if !self.preview_analysis {
            return Ok(0);
        }
        match self.preview_focus {
            PreviewFocus::Nothing => Ok(0),
            PreviewFocus::Latest => self.preview(None),
            PreviewFocus::Index(i) => self.preview(Some(i)),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Save every dataset under `dir/<name>` and the workspace descriptor.
    pub fn save(&self, dir: &Path) -> Result<()> {
        prepare_save_dir(dir)?;
        for (name, dataset) in &self.datasets {
            dataset.borrow().save(&dir.join(name))?;
        }
        let descriptor = WorkspaceDescriptor {
            version: FORMAT_VERSION.to_string(),
            datasets: self.datasets.iter().map(|(n, _)| n.clone()).collect(),
            active_dataset: self.active.clone().unwrap_or_default(),
            source: self.capture_source_description()?,
            analyzer: self.analysis.sink().map(|sink| sink.save()).transpose()?,
            collection_filters: self.collection.filter_descriptions()?,
            analysis_filters: self.analysis.filter_descriptions()?,
            preview_analysis: self.preview_analysis,
            preview_sample: self.preview_focus,
        };
        write_descriptor(&dir.join(WORKSPACE_DESCRIPTOR), &descriptor)?;
        info!(
            "saved workspace with {} datasets to {}",
            self.datasets.len(),
            dir.display()
        );
        Ok(())
    }

    /// Load a workspace written by [`Workspace::save`]. Filters and analysis
    /// sinks of unknown type are skipped with a warning. The capture source
    /// description is kept for [`Workspace::restore_capture_source`].
    pub fn load(dir: &Path) -> Result<Workspace> {
        check_load_dir(dir)?;
        let descriptor: WorkspaceDescriptor = read_descriptor(&dir.join(WORKSPACE_DESCRIPTOR))?;

        let mut workspace = Self::bare();
        workspace.saved_source = descriptor.source;
        if let Some(desc) = &descriptor.analyzer {
            match load_sink(desc) {
                Ok(sink) => workspace.analysis.set_sink(sink),
                Err(e @ (Error::UnknownSink(_) | Error::InvalidDescription { .. })) => {
                    warn!("keeping the default analysis sink: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        for name in &descriptor.datasets {
            validate_dataset_name(name)?;
            let dataset = Dataset::load(&dir.join(name))?;
            workspace.add_dataset(dataset, name)?;
        }
        load_filters_lenient(&mut workspace.collection, &descriptor.collection_filters)?;
        load_filters_lenient(&mut workspace.analysis, &descriptor.analysis_filters)?;

        if workspace.datasets.is_empty() {
            workspace.ensure_default();
        } else if !descriptor.active_dataset.is_empty() {
            workspace.activate(Some(descriptor.active_dataset.as_str()))?;
        }
        workspace.preview_analysis = descriptor.preview_analysis;
        workspace.preview_focus = descriptor.preview_sample;
        info!(
            "loaded workspace with {} datasets from {}",
            workspace.datasets.len(),
            dir.display()
        );
        Ok(workspace)
    }
}

/// Dataset names become directories next to `environment.json` and the
/// hidden `.<name>.partial` / `.<name>.old` siblings used while saving.
fn validate_dataset_name(name: &str) -> Result<()> {
    validate_name(name)?;
    if name.starts_with('.') || name == WORKSPACE_DESCRIPTOR {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

fn load_filters_lenient(pipeline: &mut Pipeline, descs: &[JsonValue]) -> Result<()> {
    for desc in descs {
        match load_filter(desc) {
            Ok(filter) => {
                pipeline.add_filter(filter);
            }
            Err(e @ (Error::UnknownFilter(_) | Error::InvalidDescription { .. })) => {
                warn!("skipping saved filter: {e}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
