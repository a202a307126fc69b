//! Capture, filter and persist cache-probe trace datasets.
//!
//! ```text
//!   Source ──▶ Filter ──▶ Filter ──▶ … ──▶ Sink
//!     │                                     │
//!     └──── DatasetSource      DatasetSink ─┘
//!                  ╲              ╱
//!                   Dataset (on disk: dataset.json + 000000/ …)
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod filters;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod workspace;

pub use config::PipelineConfig;
pub use data::{Dataset, Dtype, Sample, SharedDataset, Trace, TraceValues, FORMAT_VERSION};
pub use error::{Error, Result};
pub use filters::{Filter, InclusionFilter, NormalizeFilter, SampleStream, ThresholdFilter};
pub use pipeline::Pipeline;
pub use sinks::{DatasetSink, Sink, SummarySink};
pub use sources::{DatasetSource, Source};
pub use workspace::{PreviewFocus, Workspace};
