// projeto: lstmdbtrain
// file: src/neural/data.rs
// Batch source: turns a paginated document query into fixed-shape tensors

use log::{debug, trace};
use ndarray::{Array1, Array3};
use serde_json::Value;

use crate::neural::config::HarnessConfig;
use crate::neural::db::{DocumentStore, Filter};
use crate::neural::utils::{TrainingError, validate_targets};

/// Tensor geometry every batch must have: `(batch_size, time_steps, features)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchShape {
    pub batch_size: usize,
    pub time_steps: usize,
    pub features: usize,
}

impl BatchShape {
    /// Derives the shape from the run configuration, dropping the label
    /// column from `dimensionality`.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, TrainingError> {
        if config.dimensionality < 2 {
            return Err(TrainingError::Config(format!(
                "dimensionality {} leaves no feature columns",
                config.dimensionality
            )));
        }
        Ok(BatchShape {
            batch_size: config.batch_size,
            time_steps: config.time_steps,
            features: config.feature_dim(),
        })
    }

    pub fn window_len(&self) -> usize {
        self.time_steps * self.features
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.batch_size, self.time_steps, self.features)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Feature window flattened in time-major order.
    pub window: Vec<f64>,
    pub target: f64,
}

impl Sample {
    /// Reads `data` (rows of numbers, or an already flat list) and `target`.
    pub fn from_document(doc: &Value) -> Result<Self, TrainingError> {
        let data = doc
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| TrainingError::MalformedDocument(format!("missing 'data' array in {}", doc)))?;

        let mut window = Vec::new();
        for item in data {
            match item {
                Value::Array(row) => {
                    for value in row {
                        window.push(as_number(value, doc)?);
                    }
                }
                value => window.push(as_number(value, doc)?),
            }
        }

        let target = doc
            .get("target")
            .ok_or_else(|| TrainingError::MalformedDocument(format!("missing 'target' in {}", doc)))
            .and_then(|t| as_number(t, doc))?;

        Ok(Sample { window, target })
    }
}

fn as_number(value: &Value, doc: &Value) -> Result<f64, TrainingError> {
    value
        .as_f64()
        .ok_or_else(|| TrainingError::MalformedDocument(format!("non-numeric value {} in {}", value, doc)))
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub features: Array3<f64>,
    pub targets: Array1<f64>,
}

impl Batch {
    /// Reshapes exactly `shape.batch_size` samples; anything else is a
    /// `ShapeMismatch`, never truncated or padded.
    pub fn from_samples(samples: &[Sample], shape: &BatchShape) -> Result<Self, TrainingError> {
        if samples.len() != shape.batch_size {
            return Err(TrainingError::shape_mismatch("batch sample count", shape.batch_size, samples.len()));
        }

        let window_len = shape.window_len();
        let mut flat = Vec::with_capacity(shape.batch_size * window_len);
        for (i, sample) in samples.iter().enumerate() {
            if sample.window.len() != window_len {
                return Err(TrainingError::shape_mismatch(
                    &format!("feature window of sample {}", i),
                    window_len,
                    sample.window.len(),
                ));
            }
            flat.extend_from_slice(&sample.window);
        }

        let targets: Vec<f64> = samples.iter().map(|s| s.target).collect();
        validate_targets(&targets, "batch targets")?;

        Ok(Batch {
            features: Array3::from_shape_vec(shape.dims(), flat)?,
            targets: Array1::from_vec(targets),
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}

/// Which documents feed a loop and how they are shaped.
#[derive(Debug, Clone)]
pub struct DataQuery {
    pub collection: String,
    pub filter: Filter,
    pub shape: BatchShape,
}

impl DataQuery {
    pub fn new(collection: &str, filter: Filter, shape: BatchShape) -> Self {
        DataQuery {
            collection: collection.to_string(),
            filter,
            shape,
        }
    }

    /// A fresh pass over the query; build one per epoch.
    pub fn open<'a>(&self, store: &'a dyn DocumentStore) -> BatchSource<'a> {
        BatchSource {
            store,
            query: self.clone(),
            pages_read: 0,
            finished: false,
        }
    }

    /// First matching document, for the "no data" diagnostic.
    pub fn first_match(&self, store: &dyn DocumentStore) -> Result<Option<Value>, TrainingError> {
        Ok(store
            .find(&self.collection, &self.filter, 0, 1)?
            .into_iter()
            .next()
            .map(|doc| doc.body))
    }
}

/// Lazily fetches one page of `batch_size` documents per `next()`. A short
/// trailing page ends the pass. After the first error the source is spent.
pub struct BatchSource<'a> {
    store: &'a dyn DocumentStore,
    query: DataQuery,
    pages_read: usize,
    finished: bool,
}

impl BatchSource<'_> {
    fn fetch_next(&mut self) -> Result<Option<Batch>, TrainingError> {
        let shape = self.query.shape;
        let skip = self.pages_read * shape.batch_size;
        let docs = self
            .store
            .find(&self.query.collection, &self.query.filter, skip, shape.batch_size)?;

        if docs.len() < shape.batch_size {
            if !docs.is_empty() {
                debug!(
                    "📦 [BatchSource] dropping {} trailing documents from '{}' (batch size {})",
                    docs.len(),
                    self.query.collection,
                    shape.batch_size
                );
            }
            return Ok(None);
        }

        let samples = docs
            .iter()
            .map(|doc| Sample::from_document(&doc.body))
            .collect::<Result<Vec<_>, _>>()?;
        let batch = Batch::from_samples(&samples, &shape)?;
        trace!("[BatchSource] page {} of '{}' ready", self.pages_read, self.query.collection);
        self.pages_read += 1;
        Ok(Some(batch))
    }
}

impl Iterator for BatchSource<'_> {
    type Item = Result<Batch, TrainingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.fetch_next() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for BatchSource<'_> {}
