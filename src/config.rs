use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::data::{read_descriptor, write_descriptor, FORMAT_VERSION};
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;

// ---------------------------------------------------------------------------
// Pipeline configuration file
// ---------------------------------------------------------------------------

/// A saved filter chain, versioned like the data descriptors:
///
/// ```json
/// {
///   "version": "0.1.0",
///   "limit": 100,
///   "filters": [
///     {"type": "Normalize", "enabled": true, "threshold": 1.0},
///     {"type": "Threshold", "enabled": true, "threshold": 50.0, "trace": "L1D", "keep_below": "y"}
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    /// Capture attempts per run; absent means until the source runs dry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub filters: Vec<JsonValue>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            limit: None,
            filters: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let config: PipelineConfig = read_descriptor(path)?;
        info!(
            "loaded pipeline config with {} filters from {}",
            config.filters.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_descriptor(path, self)
    }

    /// Capture the filter chain of an existing pipeline.
    pub fn from_pipeline(pipeline: &Pipeline, limit: Option<usize>) -> Result<Self> {
        Ok(Self {
            limit,
            filters: pipeline.filter_descriptions()?,
            ..Self::default()
        })
    }

    /// Replace `pipeline`'s filters with the configured ones.
    pub fn apply_to(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.load_filters(&self.filters)
    }
}
