// projeto: lstmdbtrain
// file: src/neural/metrics.rs
// Loss accumulation, regression metrics and the predictions CSV

use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::neural::utils::TrainingError;

/// Running loss sum over processed batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossTracker {
    pub sum: f64,
    pub batches: usize,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, loss: f64) {
        self.sum += loss;
        self.batches += 1;
    }

    pub fn merge(&mut self, other: &LossTracker) {
        self.sum += other.sum;
        self.batches += other.batches;
    }

    /// `None` until at least one batch was recorded.
    pub fn average(&self) -> Option<f64> {
        if self.batches == 0 {
            None
        } else {
            Some(self.sum / self.batches as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r_squared: f64,
    pub max_error: f64,
    pub n_samples: usize,
}

impl RegressionMetrics {
    pub fn print_summary(&self) {
        info!("📈 [Metrics] Prediction Summary:");
        info!("   ├── Samples: {}", self.n_samples);
        info!("   ├── MSE: {:.6}", self.mse);
        info!("   ├── RMSE: {:.6}", self.rmse);
        info!("   ├── MAE: {:.6}", self.mae);
        info!("   ├── Max Error: {:.6}", self.max_error);
        info!("   └── R²: {:.6}", self.r_squared);
    }
}

/// Error statistics over paired predictions and targets; `None` when the
/// inputs are empty or of different lengths.
pub fn calculate_regression_metrics(predictions: &[f64], targets: &[f64]) -> Option<RegressionMetrics> {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return None;
    }
    let n = predictions.len() as f64;
    let errors: Vec<f64> = predictions.iter().zip(targets).map(|(p, t)| p - t).collect();

    let mse = errors.iter().map(|e| e * e).sum::<f64>() / n;
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let max_error = errors.iter().fold(0.0_f64, |acc, e| acc.max(e.abs()));

    let target_mean = targets.iter().sum::<f64>() / n;
    let ss_res = errors.iter().map(|e| e * e).sum::<f64>();
    let ss_tot = targets.iter().map(|t| (t - target_mean).powi(2)).sum::<f64>();
    let r_squared = if ss_tot != 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    Some(RegressionMetrics {
        mse,
        rmse: mse.sqrt(),
        mae,
        r_squared,
        max_error,
        n_samples: predictions.len(),
    })
}

#[derive(Debug, Clone)]
pub struct PredictionReport {
    pub rows: usize,
    pub path: PathBuf,
    pub metrics: Option<RegressionMetrics>,
}

/// Writes `predictions,truths` rows to `path`, replacing any existing file.
pub fn write_predictions(path: &Path, predictions: &[f64], truths: &[f64]) -> Result<(), TrainingError> {
    if predictions.len() != truths.len() {
        return Err(TrainingError::shape_mismatch("prediction rows", truths.len(), predictions.len()));
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(File::create(path)?);
    writer.write_record(["predictions", "truths"])?;
    for (prediction, truth) in predictions.iter().zip(truths) {
        writer.serialize((prediction, truth))?;
    }
    writer.flush()?;

    info!("📊 [Metrics] {} predictions saved to: {}", predictions.len(), path.display());
    Ok(())
}
