use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int64Array, UInt8Array};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, UInt8Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::error::{Error, Result};

/// Extension appended to a trace name to form its file name.
pub const TRACE_EXTENSION: &str = "trace.parquet";

const VALUES_COLUMN: &str = "values";
const ROWS_KEY: &str = "cachegrab.rows";
const COLS_KEY: &str = "cachegrab.cols";

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

/// Storage type of a trace's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    U8,
    I64,
    F64,
}

impl Dtype {
    fn arrow_type(self) -> DataType {
        match self {
            Dtype::U8 => DataType::UInt8,
            Dtype::I64 => DataType::Int64,
            Dtype::F64 => DataType::Float64,
        }
    }

    fn from_arrow(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::UInt8 => Some(Dtype::U8),
            DataType::Int64 => Some(Dtype::I64),
            DataType::Float64 => Some(Dtype::F64),
            _ => None,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dtype::U8 => write!(f, "u8"),
            Dtype::I64 => write!(f, "i64"),
            Dtype::F64 => write!(f, "f64"),
        }
    }
}

/// Row-major values of a trace, one variant per supported element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceValues {
    U8(Vec<u8>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

/// Run `$body` with `$v` bound to the inner `Vec` of whichever variant is
/// present. Works for owned, shared and mutable access.
macro_rules! with_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            $crate::data::trace::TraceValues::U8($v) => $body,
            $crate::data::trace::TraceValues::I64($v) => $body,
            $crate::data::trace::TraceValues::F64($v) => $body,
        }
    };
}
pub(crate) use with_values;

impl TraceValues {
    pub fn dtype(&self) -> Dtype {
        match self {
            TraceValues::U8(_) => Dtype::U8,
            TraceValues::I64(_) => Dtype::I64,
            TraceValues::F64(_) => Dtype::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty(dtype: Dtype) -> Self {
        match dtype {
            Dtype::U8 => TraceValues::U8(Vec::new()),
            Dtype::I64 => TraceValues::I64(Vec::new()),
            Dtype::F64 => TraceValues::F64(Vec::new()),
        }
    }
}

/// A numeric type a trace can hold. Filters are written once against this
/// trait and dispatched over [`TraceValues`].
pub trait Element: Copy + PartialOrd + Default + fmt::Debug + 'static {
    const DTYPE: Dtype;

    fn to_f64(self) -> f64;

    /// Truncating, saturating conversion (the semantics of an `as` cast).
    fn from_f64(value: f64) -> Self;

    /// `self - cutoff`, or zero when `self` is below the cutoff.
    fn clamped_sub(self, cutoff: Self) -> Self;

    fn wrap(values: Vec<Self>) -> TraceValues;
    fn slice(values: &TraceValues) -> Option<&[Self]>;
    fn slice_mut(values: &mut TraceValues) -> Option<&mut [Self]>;

    fn is_strictly_positive(self) -> bool {
        self > Self::default()
    }

    fn is_zero(self) -> bool {
        self == Self::default()
    }
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, |$a:ident, $b:ident| $sub:expr) => {
        impl Element for $ty {
            const DTYPE: Dtype = Dtype::$variant;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn clamped_sub(self, cutoff: Self) -> Self {
                if self < cutoff {
                    Self::default()
                } else {
                    let ($a, $b) = (self, cutoff);
                    $sub
                }
            }

            fn wrap(values: Vec<Self>) -> TraceValues {
                TraceValues::$variant(values)
            }

            fn slice(values: &TraceValues) -> Option<&[Self]> {
                match values {
                    TraceValues::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn slice_mut(values: &mut TraceValues) -> Option<&mut [Self]> {
                match values {
                    TraceValues::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(u8, U8, |a, b| a - b);
impl_element!(i64, I64, |a, b| a.wrapping_sub(b));
impl_element!(f64, F64, |a, b| a - b);

/// Iterate the rows of a row-major buffer. Safe for zero-width rows.
pub(crate) fn rows_of<T>(data: &[T], rows: usize, cols: usize) -> impl Iterator<Item = &[T]> {
    (0..rows).map(move |r| &data[r * cols..(r + 1) * cols])
}

// ---------------------------------------------------------------------------
// Trace – one rows × cols measurement matrix
// ---------------------------------------------------------------------------

/// A single 2-D measurement matrix: rows are observation indices (time
/// steps), columns are channels (cache sets).
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    rows: usize,
    cols: usize,
    values: TraceValues,
}

impl Trace {
    /// Build a trace from row-major data. `data.len()` must equal `rows * cols`.
    pub fn new<T: Element>(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(Error::Shape {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(Trace {
            rows,
            cols,
            values: T::wrap(data),
        })
    }

    /// Build a trace from a list of equally long rows.
    pub fn from_rows<T: Element, R: AsRef<[T]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(Error::Shape {
                    rows: rows.len(),
                    cols,
                    len: data.len() + row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Trace::new(rows.len(), cols, data)
    }

    /// A `0 × 0` trace, the result of a capture that recorded nothing.
    pub fn empty(dtype: Dtype) -> Self {
        Trace {
            rows: 0,
            cols: 0,
            values: TraceValues::empty(dtype),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn dtype(&self) -> Dtype {
        self.values.dtype()
    }

    pub fn values(&self) -> &TraceValues {
        &self.values
    }

    /// Typed view of the values, `None` if `T` is not the stored type.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(&self.values)
    }

    /// Typed mutable view. The shape cannot change through it.
    pub fn as_slice_mut<T: Element>(&mut self) -> Option<&mut [T]> {
        T::slice_mut(&mut self.values)
    }

    pub(crate) fn values_mut(&mut self) -> &mut TraceValues {
        &mut self.values
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let idx = row * self.cols + col;
        Some(with_values!(&self.values, v => v[idx].to_f64()))
    }

    /// One row widened to `f64`.
    pub fn row_f64(&self, row: usize) -> Option<Vec<f64>> {
        if row >= self.rows {
            return None;
        }
        let range = row * self.cols..(row + 1) * self.cols;
        Some(with_values!(&self.values, v => v[range].iter().map(|x| x.to_f64()).collect()))
    }

    /// Number of strictly positive entries in each row.
    pub fn positive_counts(&self) -> Vec<usize> {
        let (rows, cols) = self.shape();
        with_values!(&self.values, v => rows_of(v.as_slice(), rows, cols)
            .map(|row| row.iter().filter(|&&x| Element::is_strictly_positive(x)).count())
            .collect())
    }

    /// Keep only the rows whose mask entry is `true`.
    pub fn retain_rows(&mut self, mask: &[bool]) -> Result<()> {
        self.check_mask(mask, "")?;
        let cols = self.cols;
        let rows = self.rows;
        with_values!(&mut self.values, v => {
            let kept: Vec<_> = rows_of(v.as_slice(), rows, cols)
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .flat_map(|(row, _)| row.iter().copied())
                .collect();
            *v = kept;
        });
        self.rows = mask.iter().filter(|keep| **keep).count();
        Ok(())
    }

    pub(crate) fn check_mask(&self, mask: &[bool], name: &str) -> Result<()> {
        if mask.len() != self.rows {
            return Err(Error::RowMaskMismatch {
                trace: name.to_string(),
                mask: mask.len(),
                rows: self.rows,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Parquet codec
    // -----------------------------------------------------------------------

    /// Write the trace to `path` as a single-column parquet file. The shape
    /// travels in the schema metadata so zero-row traces keep their width.
    pub fn save(&self, path: &Path) -> Result<()> {
        let array: ArrayRef = match &self.values {
            TraceValues::U8(v) => Arc::new(UInt8Array::from(v.clone())),
            TraceValues::I64(v) => Arc::new(Int64Array::from(v.clone())),
            TraceValues::F64(v) => Arc::new(Float64Array::from(v.clone())),
        };
        let metadata = HashMap::from([
            (ROWS_KEY.to_string(), self.rows.to_string()),
            (COLS_KEY.to_string(), self.cols.to_string()),
        ]);
        let schema = Arc::new(
            Schema::new(vec![Field::new(
                VALUES_COLUMN,
                self.dtype().arrow_type(),
                false,
            )])
            .with_metadata(metadata),
        );
        let batch = RecordBatch::try_new(schema.clone(), vec![array])?;

        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    /// Read a trace written by [`Trace::save`].
    pub fn load(path: &Path) -> Result<Trace> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let builder =
            ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| Error::format(path, e))?;

        let schema = builder.schema().clone();
        let rows = read_dimension(schema.metadata(), ROWS_KEY, path)?;
        let cols = read_dimension(schema.metadata(), COLS_KEY, path)?;
        let field = schema
            .field_with_name(VALUES_COLUMN)
            .map_err(|_| Error::format(path, "missing 'values' column"))?;
        let dtype = Dtype::from_arrow(field.data_type()).ok_or_else(|| {
            Error::format(path, format!("unsupported column type {}", field.data_type()))
        })?;

        let reader = builder.build().map_err(|e| Error::format(path, e))?;
        let mut values = TraceValues::empty(dtype);
        for batch in reader {
            let batch = batch.map_err(|e| Error::format(path, e))?;
            let column = batch
                .column_by_name(VALUES_COLUMN)
                .ok_or_else(|| Error::format(path, "missing 'values' column"))?;
            let appended = match &mut values {
                TraceValues::U8(v) => column
                    .as_primitive_opt::<UInt8Type>()
                    .map(|a| v.extend_from_slice(a.values())),
                TraceValues::I64(v) => column
                    .as_primitive_opt::<Int64Type>()
                    .map(|a| v.extend_from_slice(a.values())),
                TraceValues::F64(v) => column
                    .as_primitive_opt::<Float64Type>()
                    .map(|a| v.extend_from_slice(a.values())),
            };
            if appended.is_none() || column.null_count() > 0 {
                return Err(Error::format(path, "unexpected values column contents"));
            }
        }

        if rows.checked_mul(cols) != Some(values.len()) {
            return Err(Error::format(
                path,
                format!("{} values stored for a {rows}x{cols} trace", values.len()),
            ));
        }
        Ok(Trace { rows, cols, values })
    }
}

fn read_dimension(metadata: &HashMap<String, String>, key: &str, path: &Path) -> Result<usize> {
    metadata
        .get(key)
        .ok_or_else(|| Error::format(path, format!("missing '{key}' metadata")))?
        .parse()
        .map_err(|e| Error::format(path, format!("bad '{key}' metadata: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_must_match_data_length() {
        assert!(Trace::new(2, 3, vec![0u8; 6]).is_ok());
        assert!(matches!(
            Trace::new(2, 3, vec![0u8; 5]),
            Err(Error::Shape { rows: 2, cols: 3, len: 5 })
        ));
        assert!(Trace::from_rows(&[vec![1u8, 2], vec![3]]).is_err());
    }

    #[test]
    fn from_rows_is_row_major() {
        let t = Trace::from_rows(&[[1i64, 2, 3], [4, 5, 6]]).unwrap();
        assert_eq!(t.shape(), (2, 3));
        assert_eq!(t.as_slice::<i64>(), Some(&[1, 2, 3, 4, 5, 6][..]));
        assert_eq!(t.get(1, 0), Some(4.0));
        assert_eq!(t.get(2, 0), None);
        assert_eq!(t.row_f64(0), Some(vec![1.0, 2.0, 3.0]));
        assert!(t.as_slice::<u8>().is_none());
    }

    #[test]
    fn retain_rows_drops_masked_rows() {
        let mut t = Trace::from_rows(&[[1u8, 0], [0, 0], [1, 1]]).unwrap();
        t.retain_rows(&[true, false, true]).unwrap();
        assert_eq!(t.shape(), (2, 2));
        assert_eq!(t.as_slice::<u8>(), Some(&[1, 0, 1, 1][..]));

        assert!(matches!(
            t.retain_rows(&[true]),
            Err(Error::RowMaskMismatch { mask: 1, rows: 2, .. })
        ));
    }

    #[test]
    fn zero_width_rows_are_handled() {
        let mut t = Trace::new::<f64>(3, 0, vec![]).unwrap();
        assert_eq!(t.positive_counts(), vec![0, 0, 0]);
        t.retain_rows(&[true, false, true]).unwrap();
        assert_eq!(t.shape(), (2, 0));
    }

    #[test]
    fn positive_counts_per_row() {
        let t = Trace::from_rows(&[[1.5f64, 0.0, -2.0], [3.0, 4.0, 0.1]]).unwrap();
        assert_eq!(t.positive_counts(), vec![1, 3]);
    }

    #[test]
    fn clamped_sub_never_underflows() {
        assert_eq!(3u8.clamped_sub(5), 0);
        assert_eq!(7u8.clamped_sub(5), 2);
        assert_eq!((-4i64).clamped_sub(-1), 0);
        assert_eq!(2.5f64.clamped_sub(1.0), 1.5);
        assert_eq!(u8::from_f64(12.9), 12);
        assert_eq!(u8::from_f64(-3.0), 0);
    }

    #[test]
    fn codec_preserves_dtype_shape_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let traces = [
            Trace::from_rows(&[[0u8, 255, 7], [1, 2, 3]]).unwrap(),
            Trace::from_rows(&[[-5i64], [i64::MAX]]).unwrap(),
            Trace::from_rows(&[[0.25f64, -1.0e300]]).unwrap(),
            Trace::new::<u8>(0, 64, vec![]).unwrap(),
            Trace::empty(Dtype::F64),
        ];
        for (i, trace) in traces.iter().enumerate() {
            let path = dir.path().join(format!("t{i}.{TRACE_EXTENSION}"));
            trace.save(&path).unwrap();
            let loaded = Trace::load(&path).unwrap();
            assert_eq!(&loaded, trace);
            assert_eq!(loaded.dtype(), trace.dtype());
        }
    }

    #[test]
    fn missing_trace_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Trace::load(&dir.path().join("nope.trace.parquet")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn truncated_trace_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.trace.parquet");
        Trace::from_rows(&[[1u8, 2], [3, 4]]).unwrap().save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(Trace::load(&path), Err(Error::Format { .. })));

        std::fs::write(&path, b"definitely not parquet").unwrap();
        assert!(matches!(Trace::load(&path), Err(Error::Format { .. })));
    }
}
