use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{describe, restore, Filter};
use crate::data::trace::{with_values, Element};
use crate::data::Sample;
use crate::error::Result;

/// Remove each channel's baseline.
///
/// For every trace and every column the `threshold`-th percentile of that
/// column is taken as the noise floor and subtracted; values below the floor
/// become zero. A column where most observations are at least 1 therefore
/// ends up mostly at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeFilter {
    pub enabled: bool,
    /// Percentile in `[0, 100]`.
    pub threshold: f64,
}

impl Default for NormalizeFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1.0,
        }
    }
}

impl NormalizeFilter {
    pub const TYPE_TAG: &'static str = "Normalize";
    pub const NAME: &'static str = "Normalize";

    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }
}

impl Filter for NormalizeFilter {
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
        for (name, trace) in sample.traces_mut() {
            let (rows, cols) = trace.shape();
            if rows == 0 {
                debug!("normalize: trace '{name}' is empty, skipping");
                continue;
            }
            let p = self.threshold;
            with_values!(trace.values_mut(), v => subtract_floor(v.as_mut_slice(), rows, cols, p));
        }
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

/// Per-column percentile baseline, cast to the element type and removed.
fn subtract_floor<T: Element>(data: &mut [T], rows: usize, cols: usize, p: f64) {
    let mut column = Vec::with_capacity(rows);
    for c in 0..cols {
        column.clear();
        column.extend((0..rows).map(|r| data[r * cols + c].to_f64()));
        let Some(floor) = percentile(&mut column, p) else {
            continue;
        };
        let floor = T::from_f64(floor);
        for r in 0..rows {
            let v = &mut data[r * cols + c];
            *v = v.clamped_sub(floor);
        }
    }
}

/// `p`-th percentile with linear interpolation between the closest ranks.
/// Sorts `values` in place; `None` when empty.
pub fn percentile(values: &mut [f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let rank = p.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dtype, Trace};

    fn normalize(trace: Trace, threshold: f64) -> Trace {
        let sample = Sample::new().with_trace("t", trace);
        let out = NormalizeFilter::new(threshold).apply(sample).unwrap();
        out.trace("t").unwrap().clone()
    }

    #[test]
    fn median_floor_is_removed_per_column() {
        let trace = Trace::from_rows(&[[0i64, 5], [10, 5], [20, 5]]).unwrap();
        let out = normalize(trace, 50.0);
        assert_eq!(out, Trace::from_rows(&[[0i64, 0], [0, 0], [10, 0]]).unwrap());
    }

    #[test]
    fn works_on_device_bytes() {
        let trace = Trace::from_rows(&[[0u8, 5], [10, 5], [20, 5]]).unwrap();
        let out = normalize(trace, 50.0);
        assert_eq!(out.as_slice::<u8>(), Some(&[0, 0, 0, 0, 10, 0][..]));
    }

    #[test]
    fn interpolated_floor_is_truncated_for_integers() {
        // 25th percentile of [0, 10, 20] is 5.0; of [1, 2, 4] is 1.5 → 1 as u8.
        let trace = Trace::from_rows(&[[0u8, 1], [10, 2], [20, 4]]).unwrap();
        let out = normalize(trace, 25.0);
        assert_eq!(out.as_slice::<u8>(), Some(&[0, 0, 5, 1, 15, 3][..]));

        let floats = Trace::from_rows(&[[1.0f64], [2.0], [4.0]]).unwrap();
        let out = normalize(floats, 25.0);
        assert_eq!(out.as_slice::<f64>(), Some(&[0.0, 0.5, 2.5][..]));
    }

    #[test]
    fn empty_traces_are_left_alone() {
        let zero_rows = Trace::new::<u8>(0, 16, vec![]).unwrap();
        assert_eq!(normalize(zero_rows.clone(), 50.0), zero_rows);
        assert_eq!(normalize(Trace::empty(Dtype::F64), 1.0), Trace::empty(Dtype::F64));
    }

    #[test]
    fn every_trace_is_normalized() {
        let sample = Sample::new()
            .with_trace("a", Trace::from_rows(&[[3u8], [3]]).unwrap())
            .with_trace("b", Trace::from_rows(&[[7u8], [9]]).unwrap());
        let out = NormalizeFilter::new(0.0).apply(sample).unwrap();
        assert_eq!(out.trace("a").unwrap().as_slice::<u8>(), Some(&[0, 0][..]));
        assert_eq!(out.trace("b").unwrap().as_slice::<u8>(), Some(&[0, 2][..]));
    }

    #[test]
    fn percentile_matches_linear_interpolation() {
        assert_eq!(percentile(&mut [], 50.0), None);
        assert_eq!(percentile(&mut [4.0], 99.0), Some(4.0));
        assert_eq!(percentile(&mut [20.0, 0.0, 10.0], 50.0), Some(10.0));
        assert_eq!(percentile(&mut [1.0, 2.0, 3.0, 4.0], 50.0), Some(2.5));
        assert_eq!(percentile(&mut [1.0, 2.0, 3.0, 4.0], 100.0), Some(4.0));
        assert_eq!(percentile(&mut [1.0, 2.0, 3.0, 4.0], 0.0), Some(1.0));
    }

    #[test]
    fn description_keeps_threshold() {
        let desc = NormalizeFilter::new(2.5).save().unwrap();
        assert_eq!(desc["type"], "Normalize");
        assert_eq!(desc["threshold"], 2.5);

        let mut f = NormalizeFilter::default();
        f.load(&desc).unwrap();
        assert_eq!(f, NormalizeFilter::new(2.5));
    }
}
