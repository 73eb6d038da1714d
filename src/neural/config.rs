// projeto: lstmdbtrain
// file: src/neural/config.rs
// Run configuration loaded from TOML

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::neural::utils::{Activation, LossMetric, OptimizerKind, TrainingError};

/// Every named parameter of a run. TOML keys are camelCase, except
/// `epochs_chunk` and `loglevel`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HarnessConfig {
    pub batch_size: usize,
    pub time_steps: usize,
    /// Columns per time step including the label column.
    pub dimensionality: usize,
    pub layers: usize,
    pub int_layer_dim: usize,
    pub activation: String,
    pub epochs: usize,
    #[serde(rename = "epochs_chunk")]
    pub epochs_chunk: usize,
    pub loss_metric: String,
    pub optimizer: String,
    pub learning_rate: f64,
    pub coll: String,
    pub test_coll: String,
    pub model_coll: String,
    pub model_pipe: Option<PathBuf>,
    pub data_pipe: Option<PathBuf>,
    pub to_train: bool,
    pub to_test: bool,
    pub to_predict: bool,
    pub to_re_train: bool,
    #[serde(rename = "loglevel")]
    pub log_level: u8,
    pub model_log_min: u8,
    pub db_url: String,
    pub predictions_path: PathBuf,
    pub chunk_size: usize,
    pub seed: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            batch_size: 32,
            time_steps: 10,
            dimensionality: 2,
            layers: 2,
            int_layer_dim: 32,
            activation: "tanh".to_string(),
            epochs: 10,
            epochs_chunk: 0,
            loss_metric: "mean_squared_error".to_string(),
            optimizer: "adam".to_string(),
            learning_rate: 0.001,
            coll: "train".to_string(),
            test_coll: "test".to_string(),
            model_coll: "models".to_string(),
            model_pipe: None,
            data_pipe: None,
            to_train: false,
            to_test: false,
            to_predict: false,
            to_re_train: false,
            log_level: 2,
            model_log_min: 0,
            db_url: "sqlite://lstmdb.sqlite".to_string(),
            predictions_path: PathBuf::from("predictions.csv"),
            chunk_size: 1000,
            seed: None,
        }
    }
}

/// Where a configuration came from. Reported by the caller once logging is up.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// The file was missing; every key has its default.
    Defaults(PathBuf),
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self, TrainingError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| TrainingError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &Path) -> Result<(Self, ConfigSource), TrainingError> {
        if path.exists() {
            Ok((Self::load(path)?, ConfigSource::File(path.to_path_buf())))
        } else {
            Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())))
        }
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let positive = [
            ("batchSize", self.batch_size),
            ("timeSteps", self.time_steps),
            ("layers", self.layers),
            ("intLayerDim", self.int_layer_dim),
            ("chunkSize", self.chunk_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(TrainingError::Config(format!("{} must be greater than zero", key)));
            }
        }
        if self.dimensionality < 2 {
            return Err(TrainingError::Config(format!(
                "dimensionality must include at least one feature and the label column, got {}",
                self.dimensionality
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainingError::Config(format!(
                "learningRate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.model_log_min > 3 {
            return Err(TrainingError::Config(format!(
                "modelLogMin must be between 0 and 3, got {}",
                self.model_log_min
            )));
        }
        self.activation_kind()?;
        self.loss_kind()?;
        self.optimizer_kind()?;
        Ok(())
    }

    pub fn activation_kind(&self) -> Result<Activation, TrainingError> {
        self.activation.parse()
    }

    pub fn loss_kind(&self) -> Result<LossMetric, TrainingError> {
        self.loss_metric.parse()
    }

    pub fn optimizer_kind(&self) -> Result<OptimizerKind, TrainingError> {
        self.optimizer.parse()
    }

    /// Feature columns per time step once the label column is dropped.
    pub fn feature_dim(&self) -> usize {
        self.dimensionality.saturating_sub(1)
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        match self.log_level {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Level cap for the model module, read like a minimum-severity switch:
    /// 0 shows everything, 3 silences it.
    pub fn model_log_filter(&self) -> log::LevelFilter {
        match self.model_log_min {
            0 => log::LevelFilter::Trace,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Error,
            _ => log::LevelFilter::Off,
        }
    }
}
