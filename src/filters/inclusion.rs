use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{describe, restore, Filter};
use crate::data::trace::{rows_of, with_values, Element};
use crate::data::{Sample, Trace};
use crate::error::{Error, Result};

/// Keep observations where chosen channels fired and others stayed quiet.
///
/// A row of the target trace passes when every column in `include_sets` is
/// strictly positive and every column in `exclude_sets` is zero. The lists
/// are comma separated column indices, e.g. `"3, 17,42"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusionFilter {
    pub enabled: bool,
    #[serde(rename = "trace")]
    pub target_trace: String,
    pub include_sets: String,
    pub exclude_sets: String,
}

impl InclusionFilter {
    pub const TYPE_TAG: &'static str = "Inclusion_Exclusion";
    pub const NAME: &'static str = "Inclusion/Exclusion";

    pub fn new(
        target_trace: impl Into<String>,
        include_sets: impl Into<String>,
        exclude_sets: impl Into<String>,
    ) -> Self {
        Self {
            enabled: true,
            target_trace: target_trace.into(),
            include_sets: include_sets.into(),
            exclude_sets: exclude_sets.into(),
        }
    }

    pub fn with_columns(target_trace: impl Into<String>, include: &[usize], exclude: &[usize]) -> Self {
        Self::new(target_trace, join_columns(include), join_columns(exclude))
    }

    pub fn include_columns(&self) -> Vec<i64> {
        parse_column_list(&self.include_sets)
    }

    pub fn exclude_columns(&self) -> Vec<i64> {
        parse_column_list(&self.exclude_sets)
    }

    /// Resolve a listed column against `cols`; negative entries count from
    /// the last column.
    fn resolve(&self, column: i64, cols: usize) -> Result<usize> {
        let width = cols as i64;
        let index = if column < 0 { width + column } else { column };
        if !(0..width).contains(&index) {
            return Err(Error::ColumnOutOfRange {
                trace: self.target_trace.clone(),
                column,
                cols,
            });
        }
        Ok(index as usize)
    }

    fn mask(&self, target: &Trace) -> Result<Vec<bool>> {
        let cols = target.cols();
        let include = self
            .include_columns()
            .into_iter()
            .map(|c| self.resolve(c, cols))
            .collect::<Result<Vec<_>>>()?;
        let exclude = self
            .exclude_columns()
            .into_iter()
            .map(|c| self.resolve(c, cols))
            .collect::<Result<Vec<_>>>()?;
        let rows = target.rows();
        Ok(with_values!(target.values(), v => row_mask(v.as_slice(), rows, cols, &include, &exclude)))
    }
}

impl Default for InclusionFilter {
    fn default() -> Self {
        Self::new("", "", "")
    }
}

fn row_mask<T: Element>(
    data: &[T],
    rows: usize,
    cols: usize,
    include: &[usize],
    exclude: &[usize],
) -> Vec<bool> {
    rows_of(data, rows, cols)
        .map(|row| {
            include.iter().all(|&c| Element::is_strictly_positive(row[c]))
                && exclude.iter().all(|&c| Element::is_zero(row[c]))
        })
        .collect()
}

/// Parse `"1, 2,-1"` into column indices. Blank input is the empty list, and
/// so is any input containing a token that is not an integer.
pub fn parse_column_list(list: &str) -> Vec<i64> {
    if list.trim().is_empty() {
        return Vec::new();
    }
    match list
        .split(',')
        .map(|s| s.trim().parse::<i64>())
        .collect::<std::result::Result<Vec<_>, _>>()
    {
        Ok(columns) => columns,
        Err(e) => {
            debug!("ignoring column list {list:?}: {e}");
            Vec::new()
        }
    }
}

fn join_columns(columns: &[usize]) -> String {
    columns
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl Filter for InclusionFilter {
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
        let mask = self.mask(target)?;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sample {
        Sample::new()
            .with_trace("L1D", Trace::from_rows(&[[1u8, 0], [0, 0], [1, 1]]).unwrap())
            .with_trace("L1I", Trace::from_rows(&[[5.0f64], [6.0], [7.0]]).unwrap())
    }

    fn kept_rows(filter: &InclusionFilter) -> Vec<f64> {
        let out = filter.apply(sample()).unwrap();
        out.trace("L1I").unwrap().as_slice::<f64>().unwrap().to_vec()
    }

    #[test]
    fn include_keeps_rows_where_the_column_fired() {
        let filter = InclusionFilter::with_columns("L1D", &[0], &[]);
        assert_eq!(kept_rows(&filter), [5.0, 7.0]);

        let out = filter.apply(sample()).unwrap();
        assert_eq!(out.trace("L1D").unwrap().as_slice::<u8>(), Some(&[1, 0, 1, 1][..]));
    }

    #[test]
    fn exclude_keeps_rows_where_the_column_is_quiet() {
        assert_eq!(kept_rows(&InclusionFilter::new("L1D", "", "1")), [5.0, 6.0]);
        assert_eq!(kept_rows(&InclusionFilter::new("L1D", "0", "1")), [5.0]);
        assert_eq!(kept_rows(&InclusionFilter::new("L1D", " 0 , 1 ", "")), [7.0]);
    }

    #[test]
    fn empty_lists_keep_everything() {
        assert_eq!(kept_rows(&InclusionFilter::new("L1D", "", "")), [5.0, 6.0, 7.0]);
    }

    #[test]
    fn malformed_lists_become_empty() {
        assert_eq!(parse_column_list("1,x"), Vec::<i64>::new());
        assert_eq!(parse_column_list("1,,2"), Vec::<i64>::new());
        assert_eq!(parse_column_list("1.5"), Vec::<i64>::new());
        assert_eq!(parse_column_list(" 4, 2 "), vec![4, 2]);
        assert_eq!(parse_column_list("-1"), vec![-1]);
        assert_eq!(kept_rows(&InclusionFilter::new("L1D", "0,zero", "")), [5.0, 6.0, 7.0]);
    }

    #[test]
    fn column_beyond_width_is_an_error() {
        let err = InclusionFilter::new("L1D", "0", "2").apply(sample()).unwrap_err();
        assert!(matches!(err, Error::ColumnOutOfRange { column: 2, cols: 2, .. }));

        let err = InclusionFilter::new("L1D", "-3", "").apply(sample()).unwrap_err();
        assert!(matches!(err, Error::ColumnOutOfRange { column: -3, cols: 2, .. }));
    }

    #[test]
    fn negative_columns_count_from_the_end() {
        assert_eq!(kept_rows(&InclusionFilter::new("L1D", "-1", "")), [7.0]);
        assert_eq!(kept_rows(&InclusionFilter::new("L1D", "-2", "-1")), [5.0]);
    }

    #[test]
    fn float_traces_need_strictly_positive_values() {
        let sample = Sample::new()
            .with_trace("L1D", Trace::from_rows(&[[0.0f64], [-0.0], [2.5], [-1.0]]).unwrap());
        let include = InclusionFilter::new("L1D", "0", "").apply(sample.clone()).unwrap();
        assert_eq!(include.trace("L1D").unwrap().as_slice::<f64>(), Some(&[2.5][..]));

        let exclude = InclusionFilter::new("L1D", "", "0").apply(sample).unwrap();
        assert_eq!(exclude.trace("L1D").unwrap().shape(), (2, 1));
    }

    #[test]
    fn missing_target_is_a_no_op() {
        let filter = InclusionFilter::with_columns("BTB", &[9], &[]);
        assert_eq!(filter.apply(sample()).unwrap(), sample());
    }

    #[test]
    fn description_uses_trace_and_set_strings() {
        let desc = InclusionFilter::with_columns("L1D", &[3, 17], &[42]).save().unwrap();
        assert_eq!(desc["type"], "Inclusion_Exclusion");
        assert_eq!(desc["trace"], "L1D");
        assert_eq!(desc["include_sets"], "3,17");
        assert_eq!(desc["exclude_sets"], "42");

        let mut f = InclusionFilter::default();
        f.load(&desc).unwrap();
        assert_eq!(f.include_columns(), vec![3, 17]);
    }
}
