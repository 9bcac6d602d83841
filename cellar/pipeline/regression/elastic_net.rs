use std::{
    fs, io,
    path::{Path, PathBuf},
};

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Regularization settings (`ElasticNet` section of the params document).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElasticNetParams {
    /// Overall penalty strength.
    pub alpha: f64,
    /// Share of the penalty applied as L1 (0 = ridge, 1 = lasso).
    pub l1_ratio: f64,
}

impl ElasticNetParams {
    /// Checks the ranges accepted by the solver.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(ModelError::InvalidParams(format!(
                "alpha must be a finite non-negative number, got {}",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.l1_ratio) {
            return Err(ModelError::InvalidParams(format!(
                "l1_ratio must lie in [0, 1], got {}",
                self.l1_ratio
            )));
        }
        Ok(())
    }
}

/// Fitting, inference and persistence failures.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Hyperparameters outside their valid range.
    #[error("invalid hyperparameters: {0}")]
    InvalidParams(String),
    /// Input dimensions disagree.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    Shape {
        /// Expected shape.
        expected: String,
        /// Observed shape.
        actual: String,
    },
    /// No rows to fit on.
    #[error("cannot fit on an empty dataset")]
    Empty,
    /// Inputs or fitted weights contain NaN or infinity.
    #[error("non-finite values in {0}")]
    NonFinite(&'static str),
    /// Model file could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// Model file.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: io::Error,
    },
    /// Model blob could not be encoded or decoded.
    #[error("{}: {source}", path.display())]
    Codec {
        /// Model file.
        path: PathBuf,
        /// bincode failure.
        #[source]
        source: bincode::Error,
    },
}

/// Coordinate-descent solver for
/// `1/(2n)·‖y − Xw − b‖² + α·ρ·‖w‖₁ + ½·α·(1−ρ)·‖w‖²` with a fitted intercept.
#[derive(Debug, Clone)]
pub struct ElasticNet {
    params: ElasticNetParams,
    max_iter: usize,
    tol: f64,
}

impl ElasticNet {
    /// Solver with the default iteration budget.
    #[must_use]
    pub const fn new(params: ElasticNetParams) -> Self {
        Self {
            params,
            max_iter: 1000,
            tol: 1e-6,
        }
    }

    /// Overrides the sweep budget.
    #[must_use]
    pub const fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Overrides the convergence threshold on the summed coefficient change.
    #[must_use]
    pub const fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Fits on centered data; the intercept is recovered from the column means.
    #[allow(clippy::cast_precision_loss, clippy::many_single_char_names)]
    pub fn fit(
        &self,
        feature_names: Vec<String>,
        x: &Array2<f64>,
        y: &Array1<f64>,
    ) -> Result<ElasticNetModel, ModelError> {
        self.params.validate()?;
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 {
            return Err(ModelError::Empty);
        }
        if n_samples != y.len() {
            return Err(ModelError::Shape {
                expected: format!("{n_samples} targets"),
                actual: format!("{} targets", y.len()),
            });
        }
        if feature_names.len() != n_features {
            return Err(ModelError::Shape {
                expected: format!("{n_features} feature names"),
                actual: format!("{} feature names", feature_names.len()),
            });
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("training data"));
        }

        let x_mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let y_mean = y.mean().unwrap_or(0.0);
        let x_c = x - &x_mean.clone().insert_axis(Axis(0));
        let y_c = y - y_mean;

        let col_norms: Vec<f64> = (0..n_features)
            .map(|j| x_c.column(j).mapv(|v| v * v).sum())
            .collect();
        let n = n_samples as f64;
        let l1_penalty = self.params.alpha * self.params.l1_ratio * n;
        let l2_penalty = self.params.alpha * (1.0 - self.params.l1_ratio) * n;

        let mut w = Array1::<f64>::zeros(n_features);
        let mut residual = y_c.clone();
        let mut iterations = 0;
        for _ in 0..self.max_iter {
            iterations += 1;
            let mut change = 0.0;
            for j in 0..n_features {
                let denom = col_norms[j] + l2_penalty;
                let old = w[j];
                let updated = if denom < 1e-15 {
                    0.0
                } else {
                    let rho = x_c.column(j).dot(&residual) + col_norms[j] * old;
                    soft_threshold(rho, l1_penalty) / denom
                };
                if (updated - old).abs() > 0.0 {
                    residual.scaled_add(old - updated, &x_c.column(j));
                    w[j] = updated;
                    change += (updated - old).abs();
                }
            }
            if change < self.tol {
                break;
            }
        }

        let intercept = y_mean - w.dot(&x_mean);
        if !intercept.is_finite() || w.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("fitted coefficients"));
        }
        Ok(ElasticNetModel {
            params: self.params,
            feature_names,
            coefficients: w.to_vec(),
            intercept,
            iterations,
        })
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Fitted ElasticNet parameters, persisted as a bincode blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticNetModel {
    /// Hyperparameters used for fitting.
    pub params: ElasticNetParams,
    /// Input columns in training order.
    pub feature_names: Vec<String>,
    /// One weight per feature.
    pub coefficients: Vec<f64>,
    /// Bias term.
    pub intercept: f64,
    /// Sweeps performed before convergence or the budget ran out.
    pub iterations: usize,
}

impl ElasticNetModel {
    /// Number of input features.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    /// Input columns in training order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_one(&self, row: ArrayView1<'_, f64>) -> f64 {
        row.iter()
            .zip(&self.coefficients)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.intercept
    }

    /// Predicts one value per matrix row.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>, ModelError> {
        if x.ncols() != self.n_features() {
            return Err(ModelError::Shape {
                expected: format!("{} columns", self.n_features()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok(x.rows().into_iter().map(|row| self.predict_one(row)).collect())
    }

    /// Predicts plain rows; each must have exactly [`Self::n_features`] values.
    pub fn predict_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        rows.iter()
            .enumerate()
            .map(|(idx, row)| {
                if row.len() == self.n_features() {
                    Ok(self.predict_one(ArrayView1::from(row.as_slice())))
                } else {
                    Err(ModelError::Shape {
                        expected: format!("{} values", self.n_features()),
                        actual: format!("{} values in row {idx}", row.len()),
                    })
                }
            })
            .collect()
    }

    /// Writes the model, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let path = path.as_ref();
        let io_err = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let bytes = bincode::serialize(self).map_err(|source| ModelError::Codec {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, bytes).map_err(io_err)
    }

    /// Reads a model written by [`Self::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        bincode::deserialize(&bytes).map_err(|source| ModelError::Codec {
            path: path.to_path_buf(),
            source,
        })
    }
}
