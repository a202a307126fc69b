use std::rc::Rc;

use log::debug;
use serde::de::IgnoredAny;
use serde_json::{Map, Value as JsonValue};

use crate::data::{Sample, SharedDataset};
use crate::error::{Error, Result};
use crate::filters::{describe, restore, SampleStream};

// ---------------------------------------------------------------------------
// Source capability
// ---------------------------------------------------------------------------

/// Where samples enter a pipeline: a capture device, a stored dataset, or a
/// generator in tests.
pub trait Source {
    fn type_tag(&self) -> &'static str;

    /// A source that is not ready produces nothing from [`Source::capture_many`].
    fn is_ready(&self) -> bool {
        true
    }

    /// Perform one capture. `Ok(None)` means the attempt produced no sample.
    fn capture_once(&mut self) -> Result<Option<Sample>>;

    /// Lazily capture samples.
    ///
    /// `limit` bounds the number of capture *attempts*; empty attempts are
    /// skipped, so fewer samples than `limit` may come out. Without a limit
    /// the stream runs until the consumer stops pulling.
    fn capture_many<'a>(&'a mut self, limit: Option<usize>) -> SampleStream<'a> {
        if !self.is_ready() {
            debug!("{}: not ready, capturing nothing", self.type_tag());
            return Box::new(std::iter::empty());
        }
        let mut attempts = 0usize;
        Box::new(std::iter::from_fn(move || loop {
            if limit.is_some_and(|n| attempts >= n) {
                return None;
            }
            attempts += 1;
            match self.capture_once() {
                Ok(Some(sample)) => return Some(Ok(sample)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }))
    }

    /// Description saved with a workspace. The default carries only the
    /// type tag; sources with settings add them as further fields.
    fn save(&self) -> Result<JsonValue> {
        describe(self.type_tag(), &Map::new())
    }

    /// Restore settings from [`Source::save`] output. Fails with
    /// [`Error::Config`] when the description belongs to another type.
    fn load(&mut self, desc: &JsonValue) -> Result<()> {
        restore::<IgnoredAny>(self.type_tag(), desc)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DatasetSource – replay a stored dataset
// ---------------------------------------------------------------------------

/// Replays the samples of a shared dataset in index order.
#[derive(Debug, Clone)]
pub struct DatasetSource {
    dataset: SharedDataset,
    cursor: usize,
}

impl DatasetSource {
    pub const TYPE_TAG: &'static str = "Dataset_Source";

    pub fn new(dataset: SharedDataset) -> Self {
        Self { dataset, cursor: 0 }
    }

    pub fn dataset(&self) -> &SharedDataset {
        &self.dataset
    }

    /// Restart [`Source::capture_once`] from the first sample.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl Source for DatasetSource {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn capture_once(&mut self) -> Result<Option<Sample>> {
        let sample = self.dataset.borrow().get(self.cursor).cloned();
        if sample.is_some() {
            self.cursor += 1;
        }
        Ok(sample)
    }

    /// Replays the samples present when called, from the start.
    ///
    /// The index range is fixed up front, so samples appended while the
    /// stream is being consumed (e.g. when the same dataset is also the
    /// pipeline's sink) are not replayed. Each sample is cloned only when
    /// pulled.
    fn capture_many<'a>(&'a mut self, limit: Option<usize>) -> SampleStream<'a> {
        let available = self.dataset.borrow().len();
        let end = limit.map_or(available, |n| n.min(available));
        debug!("dataset source: replaying {end} of {available} samples");

        let dataset = Rc::clone(&self.dataset);
        Box::new((0..end).filter_map(move |i| dataset.borrow().get(i).cloned().map(Ok::<_, Error>)))
    }
}
