// projeto: lstmdbtrain
// file: src/neural/trainer.rs
// Training, evaluation and prediction loops over a batch source

use chrono::Utc;
use log::{debug, info, warn};
use std::path::Path;

use crate::neural::config::HarnessConfig;
use crate::neural::data::DataQuery;
use crate::neural::db::DocumentStore;
use crate::neural::metrics::{LossTracker, PredictionReport, calculate_regression_metrics, write_predictions};
use crate::neural::model::TrainableModel;
use crate::neural::storage::ModelSnapshot;
use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub start_epoch: usize,
    pub epochs_run: usize,
    pub batches: usize,
    pub average_loss: Option<f64>,
}

impl TrainingReport {
    pub fn trained(&self) -> bool {
        self.batches > 0
    }
}

fn report_empty(query: &DataQuery, store: &dyn DocumentStore, what: &str) -> Result<(), TrainingError> {
    let diagnostic = TrainingError::EmptyDataset {
        collection: query.collection.clone(),
    };
    warn!("⚠️ [{}] {} (filter {})", what, diagnostic, query.filter);
    match query.first_match(store)? {
        Some(doc) => warn!("   └── first matching document: {}", doc),
        None => warn!("   └── the query matched no documents"),
    }
    Ok(())
}

/// Runs epochs `snapshot.epochs..config.epochs`, one gradient step per batch.
///
/// After every completed epoch the snapshot's `epochs` and `loss` are
/// advanced; `checkpoint` is called every `epochs_chunk` epochs except after
/// the last one.
pub fn train<M: TrainableModel>(
    snapshot: &mut ModelSnapshot<M>,
    config: &HarnessConfig,
    store: &dyn DocumentStore,
    query: &DataQuery,
    checkpoint: &mut dyn FnMut(&ModelSnapshot<M>) -> Result<(), TrainingError>,
) -> Result<TrainingReport, TrainingError> {
    let start_epoch = snapshot.epochs;
    let mut total = LossTracker::new();
    let mut epochs_run = 0;

    if start_epoch >= config.epochs {
        info!(
            "⏭️ [Trainer] Snapshot already has {} epochs (target {}), nothing to do",
            start_epoch, config.epochs
        );
    } else {
        info!(
            "🚀 [Trainer] Training epochs {}..{} on '{}'",
            start_epoch, config.epochs, query.collection
        );
    }

    for epoch in start_epoch..config.epochs {
        let mut epoch_loss = LossTracker::new();
        for (batch_idx, batch) in query.open(store).enumerate() {
            let batch = batch?;
            let loss = snapshot.model.train_on_batch(&batch)?;
            debug!("[Trainer] epoch {} batch {} loss {:.6}", epoch, batch_idx, loss);
            epoch_loss.record(loss);
        }

        // every epoch sees the same query, so an empty one stays empty
        if epoch_loss.batches == 0 {
            break;
        }

        total.merge(&epoch_loss);
        epochs_run += 1;
        snapshot.epochs = epoch + 1;
        snapshot.loss = total.average();
        snapshot.created_at = Utc::now();

        info!(
            "📊 [Trainer] Epoch {}/{} - loss {:.6} over {} batches",
            epoch + 1,
            config.epochs,
            epoch_loss.average().unwrap_or(f64::NAN),
            epoch_loss.batches
        );

        let last = epoch + 1 == config.epochs;
        if config.epochs_chunk > 0 && (epoch + 1) % config.epochs_chunk == 0 && !last {
            info!("💾 [Trainer] Checkpoint at epoch {}", epoch + 1);
            checkpoint(&*snapshot)?;
        }
    }

    match total.average() {
        Some(average) => info!(
            "✅ [Trainer] Average loss {:.6} over {} batches",
            average, total.batches
        ),
        None => report_empty(query, store, "Trainer")?,
    }

    Ok(TrainingReport {
        start_epoch,
        epochs_run,
        batches: total.batches,
        average_loss: total.average(),
    })
}

/// Scores every batch without touching the model; `None` when no batch was
/// produced.
pub fn evaluate<M: TrainableModel>(
    model: &M,
    store: &dyn DocumentStore,
    query: &DataQuery,
) -> Result<Option<f64>, TrainingError> {
    let mut tracker = LossTracker::new();
    for (batch_idx, batch) in query.open(store).enumerate() {
        let loss = model.evaluate(&batch?)?;
        debug!("[Evaluator] batch {} loss {:.6}", batch_idx, loss);
        tracker.record(loss);
    }

    match tracker.average() {
        Some(average) => info!(
            "✅ [Evaluator] Average loss {:.6} over {} batches of '{}'",
            average, tracker.batches, query.collection
        ),
        None => report_empty(query, store, "Evaluator")?,
    }
    Ok(tracker.average())
}

/// Runs inference over every batch and writes one CSV row per sample.
pub fn predict<M: TrainableModel>(
    model: &M,
    store: &dyn DocumentStore,
    query: &DataQuery,
    path: &Path,
) -> Result<PredictionReport, TrainingError> {
    let mut predictions = Vec::new();
    let mut truths = Vec::new();
    for (batch_idx, batch) in query.open(store).enumerate() {
        let batch = batch?;
        let output = model.predict(&batch)?;
        if output.len() != batch.len() {
            return Err(TrainingError::shape_mismatch("model output", batch.len(), output.len()));
        }
        debug!("[Predictor] batch {} -> {} predictions", batch_idx, output.len());
        predictions.extend(output.iter().copied());
        truths.extend(batch.targets.iter().copied());
    }

    if predictions.is_empty() {
        report_empty(query, store, "Predictor")?;
    }
    write_predictions(path, &predictions, &truths)?;

    let metrics = calculate_regression_metrics(&predictions, &truths);
    if let Some(metrics) = &metrics {
        metrics.print_summary();
    }

    Ok(PredictionReport {
        rows: predictions.len(),
        path: path.to_path_buf(),
        metrics,
    })
}
