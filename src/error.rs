use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Error taxonomy shared by the data layer, filters and pipelines
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum Error {
    /// An expected file or directory does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A path that must be a directory is something else.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// A save target holds files that are not a saved dataset.
    #[error("refusing to replace non-dataset directory: {}", .0.display())]
    Occupied(PathBuf),

    /// The directory exists but its `dataset.json` / `sample.json` does not.
    #[error("missing descriptor: {}", .0.display())]
    MissingManifest(PathBuf),

    /// Structurally invalid descriptor or array encoding.
    #[error("malformed {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    /// Version string on disk differs from the one this build writes.
    #[error("unsupported format version '{found}' in {} (supported: {expected})", path.display())]
    Version {
        path: PathBuf,
        found: String,
        expected: String,
    },

    /// A saved description carries another component's type tag.
    #[error("description has type '{found}', expected '{expected}'")]
    Config { expected: String, found: String },

    /// The type tag matches but the parameters do not deserialize.
    #[error("invalid '{tag}' description: {reason}")]
    InvalidDescription { tag: String, reason: String },

    #[error("unknown filter type '{0}'")]
    UnknownFilter(String),

    #[error("unknown analysis sink type '{0}'")]
    UnknownSink(String),

    /// Names used as file or directory names on disk.
    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("{len} values cannot form a {rows}x{cols} trace")]
    Shape { rows: usize, cols: usize, len: usize },

    #[error("row mask has {mask} entries but trace '{trace}' has {rows} rows")]
    RowMaskMismatch {
        trace: String,
        mask: usize,
        rows: usize,
    },

    #[error("column {column} is out of range for trace '{trace}' ({cols} columns)")]
    ColumnOutOfRange {
        trace: String,
        /// As listed; negative values count from the last column.
        column: i64,
        cols: usize,
    },

    /// No dataset of that name in the workspace.
    #[error("no dataset named '{0}'")]
    UnknownDataset(String),

    /// `run` was called on a pipeline without a source or sink.
    #[error("pipeline has no {0}")]
    MissingEndpoint(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl Error {
    pub(crate) fn format(path: &Path, reason: impl fmt::Display) -> Self {
        Error::Format {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
