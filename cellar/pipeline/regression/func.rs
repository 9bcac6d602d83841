use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use super::reporter::MetricsReport;

/// Rejected split request.
#[derive(Debug, Error, PartialEq)]
pub enum SplitError {
    /// Fraction outside `(0, 1)`.
    #[error("test fraction {0} must lie strictly between 0 and 1")]
    Fraction(f64),
    /// One side of the split would be empty.
    #[error("{rows} rows cannot be split with test fraction {fraction}: a partition would be empty")]
    Degenerate {
        /// Rows available.
        rows: usize,
        /// Requested fraction.
        fraction: f64,
    },
}

/// Row indices for each partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    /// Training rows.
    pub train: Vec<usize>,
    /// Held-out rows.
    pub test: Vec<usize>,
}

/// Shuffles `0..rows` with a seeded ChaCha stream and holds out `ceil(fraction * rows)`
/// indices for testing. The same `(rows, fraction, seed)` always yields the same split.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn train_test_split(rows: usize, fraction: f64, seed: u64) -> Result<SplitIndices, SplitError> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(SplitError::Fraction(fraction));
    }
    let test_rows = (fraction * rows as f64).ceil() as usize;
    if test_rows == 0 || test_rows >= rows {
        return Err(SplitError::Degenerate { rows, fraction });
    }
    let mut order: Vec<usize> = (0..rows).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let train = order.split_off(test_rows);
    Ok(SplitIndices { train, test: order })
}

/// Mean squared error; zero for empty or mismatched inputs.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() || actual.len() != predicted.len() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}

/// Mean absolute error; zero for empty or mismatched inputs.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() || actual.len() != predicted.len() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Coefficient of determination. A constant target scores 1 when matched exactly and 0
/// otherwise.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() || actual.len() != predicted.len() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// RMSE, MAE and R² in one report.
#[must_use]
pub fn regression_metrics(actual: &[f64], predicted: &[f64]) -> MetricsReport {
    MetricsReport {
        rmse: mean_squared_error(actual, predicted).sqrt(),
        mae: mean_absolute_error(actual, predicted),
        r2: r2_score(actual, predicted),
    }
}
