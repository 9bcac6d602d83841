use serde::{Deserialize, Serialize};

/// Evaluation metrics persisted as `{"rmse": .., "mae": .., "r2": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Root mean squared error.
    pub rmse: f64,
    /// Mean absolute error.
    pub mae: f64,
    /// Coefficient of determination.
    pub r2: f64,
}

impl MetricsReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[eval] rmse={:.4} mae={:.4} r2={:.4}",
            self.rmse, self.mae, self.r2
        )
    }
}

/// Report describing a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Model kind.
    pub model: String,
    /// Regularization strength.
    pub alpha: f64,
    /// L1/L2 blend.
    pub l1_ratio: f64,
    /// Rows used for fitting.
    pub train_rows: usize,
    /// Feature count.
    pub features: usize,
    /// Coordinate-descent sweeps performed.
    pub iterations: usize,
    /// RMSE on the training rows.
    pub train_rmse: f64,
}

impl TrainingReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[train] model={} alpha={} l1_ratio={} rows={} features={} iterations={} rmse={:.4}",
            self.model,
            self.alpha,
            self.l1_ratio,
            self.train_rows,
            self.features,
            self.iterations,
            self.train_rmse
        )
    }
}
