/// Filters: configurable per-sample transforms chained inside a pipeline.
///
/// ```text
///   stream ─▶ Normalize ─▶ Threshold ─▶ Inclusion/Exclusion ─▶ …
/// ```
///
/// Every filter wraps the upstream [`SampleStream`] in its own lazy adaptor;
/// nothing is computed until the sink pulls.
pub mod inclusion;
pub mod normalize;
pub mod threshold;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::data::Sample;
use crate::error::{Error, Result};

pub use inclusion::InclusionFilter;
pub use normalize::NormalizeFilter;
pub use threshold::ThresholdFilter;

/// A lazy sequence of samples flowing between pipeline stages.
///
/// Items are owned: a source hands out its own copy of every sample, so each
/// stage may edit what it receives without affecting anyone else's view.
pub type SampleStream<'a> = Box<dyn Iterator<Item = Result<Sample>> + 'a>;

// ---------------------------------------------------------------------------
// Filter capability
// ---------------------------------------------------------------------------

pub trait Filter: fmt::Debug {
    /// Discriminant used in saved descriptions.
    fn type_tag(&self) -> &'static str;

    /// Human readable name.
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Transform a single sample.
    fn apply(&self, sample: Sample) -> Result<Sample>;

    /// Wrap a stream of samples. The default maps [`Filter::apply`] over the
    /// stream lazily, passing samples through untouched while disabled.
    /// Filters that need statistics over the whole batch override this.
    fn apply_many<'a>(&'a self, samples: SampleStream<'a>) -> SampleStream<'a> {
        Box::new(samples.map(move |sample| {
            let sample = sample?;
            if self.is_enabled() {
                self.apply(sample)
            } else {
                Ok(sample)
            }
        }))
    }

    /// Compact JSON description (`type`, `enabled` and the parameters).
    fn save(&self) -> Result<JsonValue>;

    /// Restore parameters from a description of the same type.
    fn load(&mut self, desc: &JsonValue) -> Result<()>;
}

/// Serialize `config` with the `type` tag in front.
pub(crate) fn describe<T: Serialize>(tag: &str, config: &T) -> Result<JsonValue> {
    let mut desc = Map::new();
    desc.insert("type".to_string(), JsonValue::String(tag.to_string()));
    match serde_json::to_value(config)? {
        JsonValue::Object(fields) => desc.extend(fields),
        other => {
            desc.insert("value".to_string(), other);
        }
    }
    Ok(JsonValue::Object(desc))
}

/// Check the `type` tag of `desc` and decode the remaining fields.
pub(crate) fn restore<T: DeserializeOwned>(tag: &str, desc: &JsonValue) -> Result<T> {
    let found = desc.get("type").and_then(JsonValue::as_str).unwrap_or("");
    if found != tag {
        return Err(Error::Config {
            expected: tag.to_string(),
            found: found.to_string(),
        });
    }
    serde_json::from_value(desc.clone()).map_err(|e| Error::InvalidDescription {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Registry: type tag → constructor
// ---------------------------------------------------------------------------

struct FilterKind {
    tag: &'static str,
    name: &'static str,
    create: fn() -> Box<dyn Filter>,
}

fn create<F: Filter + Default + 'static>() -> Box<dyn Filter> {
    Box::new(F::default())
}

static REGISTRY: &[FilterKind] = &[
    FilterKind {
        tag: NormalizeFilter::TYPE_TAG,
        name: NormalizeFilter::NAME,
        create: create::<NormalizeFilter>,
    },
    FilterKind {
        tag: ThresholdFilter::TYPE_TAG,
        name: ThresholdFilter::NAME,
        create: create::<ThresholdFilter>,
    },
    FilterKind {
        tag: InclusionFilter::TYPE_TAG,
        name: InclusionFilter::NAME,
        create: create::<InclusionFilter>,
    },
];

/// `(type tag, display name)` of every registered filter.
pub fn filter_kinds() -> impl Iterator<Item = (&'static str, &'static str)> {
    REGISTRY.iter().map(|k| (k.tag, k.name))
}

/// A filter of the given type with default parameters.
pub fn create_filter(tag: &str) -> Option<Box<dyn Filter>> {
    REGISTRY.iter().find(|k| k.tag == tag).map(|k| (k.create)())
}

/// Rebuild a filter from its saved description.
pub fn load_filter(desc: &JsonValue) -> Result<Box<dyn Filter>> {
    let tag = desc.get("type").and_then(JsonValue::as_str).unwrap_or("");
    let mut filter = create_filter(tag).ok_or_else(|| Error::UnknownFilter(tag.to_string()))?;
    filter.load(desc)?;
    Ok(filter)
}
