// projeto: lstmdbtrain
// file: src/neural/orchestrator.rs
// Runs train / test / predict according to the configured mode flags

use log::{info, warn};

use crate::neural::config::HarnessConfig;
use crate::neural::data::{BatchShape, DataQuery};
use crate::neural::db::{DocumentStore, Filter};
use crate::neural::metrics::PredictionReport;
use crate::neural::model::{StackedLstm, create_model};
use crate::neural::storage::{ModelCodec, ModelRegistry, ModelSnapshot, load_pipe};
use crate::neural::trainer::{self, TrainingReport};
use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub training: Option<TrainingReport>,
    pub test_loss: Option<f64>,
    pub prediction: Option<PredictionReport>,
}

pub struct Harness<'a> {
    config: HarnessConfig,
    shape: BatchShape,
    store: &'a dyn DocumentStore,
    registry: ModelRegistry<'a>,
    snapshot: Option<ModelSnapshot>,
}

impl<'a> Harness<'a> {
    pub fn new(config: &HarnessConfig, store: &'a dyn DocumentStore) -> Result<Self, TrainingError> {
        config.validate()?;
        Ok(Harness {
            config: config.clone(),
            shape: BatchShape::from_config(config)?,
            store,
            registry: ModelRegistry::new(store, &config.model_coll),
            snapshot: None,
        })
    }

    pub fn with_codec(mut self, codec: Box<dyn ModelCodec>) -> Self {
        self.registry = ModelRegistry::with_codec(self.store, &self.config.model_coll, codec);
        self
    }

    /// The model currently held in memory, if any step produced or loaded one.
    pub fn snapshot(&self) -> Option<&ModelSnapshot> {
        self.snapshot.as_ref()
    }

    fn data_filter(&self) -> Result<Filter, TrainingError> {
        match &self.config.data_pipe {
            Some(path) => load_pipe(path),
            None => Ok(Filter::all()),
        }
    }

    fn model_filter(&self) -> Result<Filter, TrainingError> {
        match &self.config.model_pipe {
            Some(path) => load_pipe(path),
            None => Ok(Filter::all()),
        }
    }

    fn check_shape(&self, model: &StackedLstm) -> Result<(), TrainingError> {
        let expected = self.shape.dims();
        let actual = model.topology().input_shape();
        if expected != actual {
            return Err(TrainingError::shape_mismatch("stored model input", expected, actual));
        }
        Ok(())
    }

    fn load_snapshot(&self) -> Result<ModelSnapshot, TrainingError> {
        let snapshot = self.registry.get_model(&self.model_filter()?)?;
        self.check_shape(&snapshot.model)?;
        Ok(snapshot)
    }

    /// Loads the newest matching snapshot unless a model is already held.
    pub fn ensure_model(&mut self) -> Result<&ModelSnapshot, TrainingError> {
        let snapshot = match self.snapshot.take() {
            Some(snapshot) => snapshot,
            None => self.load_snapshot()?,
        };
        Ok(self.snapshot.insert(snapshot))
    }

    pub fn train(&mut self) -> Result<TrainingReport, TrainingError> {
        let mut snapshot = if self.config.to_re_train {
            let snapshot = self.load_snapshot()?;
            info!("🔄 [Harness] Resuming from epoch {}", snapshot.epochs);
            snapshot
        } else {
            create_model(&self.config)?
        };

        let query = DataQuery::new(&self.config.coll, self.data_filter()?, self.shape);
        let registry = &self.registry;
        let report = trainer::train(&mut snapshot, &self.config, self.store, &query, &mut |s| {
            registry.save(s).map(|_| ())
        })?;

        if report.trained() {
            self.registry.save(&snapshot)?;
        }
        self.snapshot = Some(snapshot);
        Ok(report)
    }

    pub fn test(&mut self) -> Result<Option<f64>, TrainingError> {
        let query = DataQuery::new(&self.config.test_coll, self.data_filter()?, self.shape);
        let store = self.store;
        let snapshot = self.ensure_model()?;
        trainer::evaluate(&snapshot.model, store, &query)
    }

    pub fn predict(&mut self) -> Result<PredictionReport, TrainingError> {
        let query = DataQuery::new(&self.config.test_coll, self.data_filter()?, self.shape);
        let path = self.config.predictions_path.clone();
        let store = self.store;
        let snapshot = self.ensure_model()?;
        trainer::predict(&snapshot.model, store, &query, &path)
    }
}

/// Train, then test, then predict, each only when its flag is set.
pub fn run(config: &HarnessConfig, store: &dyn DocumentStore) -> Result<RunSummary, TrainingError> {
    let mut harness = Harness::new(config, store)?;
    let mut summary = RunSummary::default();

    if !(config.to_train || config.to_test || config.to_predict) {
        warn!("⚠️ [Harness] None of toTrain, toTest or toPredict is set; nothing to do");
        return Ok(summary);
    }

    if config.to_train {
        summary.training = Some(harness.train()?);
    }
    if config.to_test {
        summary.test_loss = harness.test()?;
    }
    if config.to_predict {
        summary.prediction = Some(harness.predict()?);
    }

    info!("🎉 [Harness] Run finished");
    Ok(summary)
}
