//! Source ─▶ filters ─▶ sink, evaluated lazily.
//!
//! ```text
//!   Source::capture_many ─▶ Filter::apply_many ─▶ … ─▶ Sink::analyze_many
//!            ▲                                                │
//!            └──────────────── pulled one sample at a time ◀──┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use serde_json::Value as JsonValue;

use crate::data::Sample;
use crate::error::{Error, Result};
use crate::filters::{load_filter, Filter, SampleStream};
use crate::sinks::Sink;
use crate::sources::Source;

pub struct Pipeline {
    source: Option<Box<dyn Source>>,
    sink: Option<Box<dyn Sink>>,
    filters: Vec<Box<dyn Filter>>,
    stop: Arc<AtomicBool>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            source: None,
            sink: None,
            filters: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_source(&mut self, source: Box<dyn Source>) {
        debug!("pipeline: source set to {}", source.type_tag());
        self.source = Some(source);
    }

    pub fn set_sink(&mut self, sink: Box<dyn Sink>) {
        debug!("pipeline: sink set to {}", sink.type_tag());
        self.sink = Some(sink);
    }

    pub fn source(&self) -> Option<&dyn Source> {
        self.source.as_deref()
    }

    pub fn sink(&self) -> Option<&dyn Sink> {
        self.sink.as_deref()
    }

    pub fn take_source(&mut self) -> Option<Box<dyn Source>> {
        self.source.take()
    }

    /// Detach the sink, e.g. to read back what it collected.
    pub fn take_sink(&mut self) -> Option<Box<dyn Sink>> {
        self.sink.take()
    }

    // -----------------------------------------------------------------------
    // Filter list
    // -----------------------------------------------------------------------

    /// Append a filter and return its position.
    pub fn add_filter(&mut self, filter: Box<dyn Filter>) -> usize {
        self.filters.push(filter);
        self.filters.len() - 1
    }

    pub fn remove_filter(&mut self, index: usize) -> Option<Box<dyn Filter>> {
        (index < self.filters.len()).then(|| self.filters.remove(index))
    }

    /// Move the filter at `index` by `offset` positions. The destination is
    /// clamped to the list, so a large offset moves it to either end.
    /// Returns the new position, or `None` if `index` is out of range.
    pub fn move_filter(&mut self, index: usize, offset: isize) -> Option<usize> {
        if index >= self.filters.len() {
            return None;
        }
        let last = self.filters.len() - 1;
        let target = index.saturating_add_signed(offset).min(last);
        let filter = self.filters.remove(index);
        self.filters.insert(target, filter);
        Some(target)
    }

    pub fn filters(&self) -> &[Box<dyn Filter>] {
        &self.filters
    }

    pub fn filter_mut(&mut self, index: usize) -> Option<&mut (dyn Filter + 'static)> {
        self.filters.get_mut(index).map(|f| &mut **f)
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    /// Descriptions of every filter, in order.
    pub fn filter_descriptions(&self) -> Result<Vec<JsonValue>> {
        self.filters.iter().map(|f| f.save()).collect()
    }

    /// Replace the filter list with filters rebuilt from `descs`. Nothing
    /// changes if any description fails to load.
    pub fn load_filters(&mut self, descs: &[JsonValue]) -> Result<()> {
        let filters = descs.iter().map(load_filter).collect::<Result<Vec<_>>>()?;
        self.filters = filters;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Flag checked before every pull. Setting it from anywhere (another
    /// thread, a signal handler) ends the current run after the sample in
    /// flight. Each run clears it when it starts.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Capture from the source (at most `limit` attempts), filter, and drain
    /// into the sink. Returns the number of samples the sink consumed.
    pub fn run(&mut self, limit: Option<usize>) -> Result<usize> {
        let Pipeline {
            source,
            sink,
            filters,
            stop,
        } = self;
        let source = source.as_mut().ok_or(Error::MissingEndpoint("source"))?;
        let sink = sink.as_mut().ok_or(Error::MissingEndpoint("sink"))?;
        info!(
            "running pipeline: {} -> {} filters -> {}",
            source.type_tag(),
            filters.len(),
            sink.type_tag()
        );
        drain(source.capture_many(limit), filters, sink.as_mut(), stop)
    }

    /// Like [`Pipeline::run`] but feeds `samples` in place of the source.
    pub fn run_samples<I>(&mut self, samples: I) -> Result<usize>
    where
        I: IntoIterator<Item = Sample>,
    {
        let Pipeline {
            sink, filters, stop, ..
        } = self;
        let sink = sink.as_mut().ok_or(Error::MissingEndpoint("sink"))?;
        info!(
            "running pipeline on given samples: {} filters -> {}",
            filters.len(),
            sink.type_tag()
        );
        drain(
            Box::new(samples.into_iter().map(Ok::<_, Error>)),
            filters,
            sink.as_mut(),
            stop,
        )
    }
}

fn drain<'a>(
    input: SampleStream<'a>,
    filters: &'a [Box<dyn Filter>],
    sink: &mut dyn Sink,
    stop: &'a AtomicBool,
) -> Result<usize> {
    stop.store(false, Ordering::SeqCst);
    let mut stream: SampleStream<'a> = Box::new(StopAt { inner: input, stop });
    for filter in filters {
        stream = filter.apply_many(stream);
    }
    let count = sink.analyze_many(stream)?;
    info!("pipeline finished: {count} samples");
    Ok(count)
}

/// Ends the wrapped stream once the stop flag is raised, without pulling
/// another item from it.
struct StopAt<'a> {
    inner: SampleStream<'a>,
    stop: &'a AtomicBool,
}

impl Iterator for StopAt<'_> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.load(Ordering::SeqCst) {
            debug!("pipeline: stop requested");
            return None;
        }
        self.inner.next()
    }
}
