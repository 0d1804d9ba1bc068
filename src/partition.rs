use crate::config::SplitRatios;
use crate::error::FittingError;
use crate::models::IndexPartition;

/// Splits `[0, n)` into contiguous train, test and validation segments, in that order.
///
/// Each segment holds `floor(n * ratio)` rows; rows past the three segments are left
/// unassigned. No randomness is involved, so repeated runs see identical segments.
pub fn train_test_validation_indices(
    n: usize,
    ratios: &SplitRatios,
) -> Result<IndexPartition, FittingError> {
    ratios.validate()?;

    let train_len = segment_len(n, ratios.train);
    let test_len = segment_len(n, ratios.test);
    let validation_len = segment_len(n, ratios.validation);

    let test_start = train_len.min(n);
    let validation_start = (test_start + test_len).min(n);
    let validation_end = (validation_start + validation_len).min(n);

    Ok(IndexPartition {
        train: (0..test_start).collect(),
        test: (test_start..validation_start).collect(),
        validation: (validation_start..validation_end).collect(),
    })
}

fn segment_len(n: usize, ratio: f64) -> usize {
    (n as f64 * ratio).floor() as usize
}

/// Copies the rows at `indices` out of `rows`.
pub fn select_rows(rows: &[Vec<f64>], indices: &[usize]) -> Vec<Vec<f64>> {
    indices.iter().map(|&idx| rows[idx].clone()).collect()
}

pub fn select_values(values: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&idx| values[idx]).collect()
}
