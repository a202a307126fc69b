use log::{debug, info};
use serde::de::IgnoredAny;
use serde_json::{Map, Value as JsonValue};

use crate::data::{Sample, SharedDataset};
use crate::error::{Error, Result};
use crate::filters::{describe, restore, SampleStream};

// ---------------------------------------------------------------------------
// Sink capability
// ---------------------------------------------------------------------------

/// Where samples leave a pipeline.
pub trait Sink {
    fn type_tag(&self) -> &'static str;

    fn analyze_once(&mut self, sample: Sample) -> Result<()>;

    /// Drain `samples` into [`Sink::analyze_once`] and return how many were
    /// consumed. The first error stops the drain; samples handled before it
    /// stay handled.
    fn analyze_many(&mut self, samples: SampleStream<'_>) -> Result<usize> {
        let mut count = 0;
        for sample in samples {
            self.analyze_once(sample?)?;
            count += 1;
        }
        Ok(count)
    }

    /// Description saved with a workspace: the type tag plus any settings.
    fn save(&self) -> Result<JsonValue> {
        describe(self.type_tag(), &Map::new())
    }

    /// Fails with [`Error::Config`] on another type's description.
    fn load(&mut self, desc: &JsonValue) -> Result<()> {
        restore::<IgnoredAny>(self.type_tag(), desc)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DatasetSink – append into a shared dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DatasetSink {
    dataset: SharedDataset,
}

impl DatasetSink {
    pub const TYPE_TAG: &'static str = "Dataset_Sink";

    pub fn new(dataset: SharedDataset) -> Self {
        Self { dataset }
    }

    pub fn dataset(&self) -> &SharedDataset {
        &self.dataset
    }
}

impl Sink for DatasetSink {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn analyze_once(&mut self, sample: Sample) -> Result<()> {
        self.dataset.borrow_mut().push(sample);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SummarySink – one log line per sample
// ---------------------------------------------------------------------------

/// Logs the trace names and the shape of the first trace of every sample,
/// and keeps the lines for later display.
#[derive(Debug, Clone, Default)]
pub struct SummarySink {
    lines: Vec<String>,
}

impl SummarySink {
    pub const TYPE_TAG: &'static str = "Simple_Analysis";
    pub const NAME: &'static str = "Simple";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// `Traces: L1D L1I shape: (12, 64)`
pub fn summarize(sample: &Sample) -> String {
    let names: Vec<&str> = sample.trace_names().collect();
    let shape = match sample.traces().next() {
        Some((_, trace)) => format!("({}, {})", trace.rows(), trace.cols()),
        None => "()".to_string(),
    };
    format!("Traces: {} shape: {shape}", names.join(" "))
}

impl Sink for SummarySink {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn analyze_once(&mut self, sample: Sample) -> Result<()> {
        let line = summarize(&sample);
        info!("{line}");
        self.lines.push(line);
        debug!("summary: {} lines recorded", self.lines.len());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry: analysis sinks that can be rebuilt from a description
// ---------------------------------------------------------------------------

struct SinkKind {
    tag: &'static str,
    name: &'static str,
    create: fn() -> Box<dyn Sink>,
}

fn create<S: Sink + Default + 'static>() -> Box<dyn Sink> {
    Box::new(S::default())
}

static REGISTRY: &[SinkKind] = &[SinkKind {
    tag: SummarySink::TYPE_TAG,
    name: SummarySink::NAME,
    create: create::<SummarySink>,
}];

/// `(type tag, display name)` of every analysis sink that can be restored.
/// [`DatasetSink`] is absent: it is bound to a dataset, not described.
pub fn sink_kinds() -> impl Iterator<Item = (&'static str, &'static str)> {
    REGISTRY.iter().map(|k| (k.tag, k.name))
}

pub fn create_sink(tag: &str) -> Option<Box<dyn Sink>> {
    REGISTRY.iter().find(|k| k.tag == tag).map(|k| (k.create)())
}

/// Rebuild an analysis sink from its saved description.
pub fn load_sink(desc: &JsonValue) -> Result<Box<dyn Sink>> {
    let tag = desc.get("type").and_then(JsonValue::as_str).unwrap_or("");
    let mut sink = create_sink(tag).ok_or_else(|| Error::UnknownSink(tag.to_string()))?;
    sink.load(desc)?;
    Ok(sink)
}
