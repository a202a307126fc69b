use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use super::{describe, restore, Filter};
use crate::data::Sample;
use crate::error::Result;

/// Drop observations that are too busy (or too quiet).
///
/// The target trace decides: each row's density is the number of strictly
/// positive channels. Rows are kept while the density is at most
/// `threshold`% of the channel count (`keep_below`), or above it otherwise.
/// The same rows are then removed from every trace of the sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdFilter {
    pub enabled: bool,
    /// Percentage of the channel count, `[0, 100]`.
    pub threshold: f64,
    #[serde(rename = "trace")]
    pub target_trace: String,
    #[serde(with = "yes_no")]
    pub keep_below: bool,
}

impl Default for ThresholdFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 50.0,
            target_trace: String::new(),
            keep_below: true,
        }
    }
}

impl ThresholdFilter {
    pub const TYPE_TAG: &'static str = "Threshold";
    pub const NAME: &'static str = "Threshold";

    pub fn new(target_trace: impl Into<String>, threshold: f64, keep_below: bool) -> Self {
        Self {
            enabled: true,
            threshold,
            target_trace: target_trace.into(),
            keep_below,
        }
    }
}

impl Filter for ThresholdFilter {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn apply(&self, mut sample: Sample) -> Result<Sample> {
        let Some(target) = sample.trace(&self.target_trace) else {
            return Ok(sample);
        };

        let cutoff = self.threshold * target.cols() as f64 / 100.0;
        let mask: Vec<bool> = target
            .positive_counts()
            .into_iter()
            .map(|count| {
                let count = count as f64;
                if self.keep_below {
                    count <= cutoff
                } else {
                    count > cutoff
                }
            })
            .collect();

        debug!(
            "threshold: keeping {} of {} rows",
            mask.iter().filter(|k| **k).count(),
            mask.len()
        );
        sample.retain_rows(&mask)?;
        Ok(sample)
    }

    fn save(&self) -> Result<JsonValue> {
        describe(Self::TYPE_TAG, self)
    }

    fn load(&mut self, desc: &JsonValue) -> Result<()> {
        *self = restore(Self::TYPE_TAG, desc)?;
        Ok(())
    }
}

/// Booleans stored as `"y"` / `"n"` in saved descriptions.
mod yes_no {
    use super::*;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "y" } else { "n" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw == "y")
    }
}
