// projeto: lstmdbtrain
// file: src/neural/utils.rs
// Error handling, optimizers, activations and loss functions

use ndarray::{Array, ArrayD, Dimension, IxDyn, ShapeError, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("Model type mismatch for query {query}: got '{actual}', expected '{expected}'")]
    TypeMismatch {
        query: String,
        expected: String,
        actual: String,
    },

    #[error("No data available in collection '{collection}'")]
    EmptyDataset { collection: String },

    #[error("No model found in collection '{collection}' for query {query}")]
    ModelNotFound { collection: String, query: String },

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Model configuration error: {0}")]
    ModelConfiguration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(#[from] postgres::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),
}

impl TrainingError {
    pub fn shape_mismatch(what: &str, expected: impl fmt::Debug, actual: impl fmt::Debug) -> Self {
        TrainingError::ShapeMismatch {
            what: what.to_string(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}

/// Element-wise nonlinearity shared by every recurrent layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Tanh,
    Relu,
    Sigmoid,
    Linear,
}

impl Activation {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => sigmoid_scalar(x),
            Activation::Linear => x,
        }
    }

    /// Derivative with respect to the pre-activation value `x`.
    pub fn derivative(self, x: f64) -> f64 {
        match self {
            Activation::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => {
                let s = sigmoid_scalar(x);
                s * (1.0 - s)
            }
            Activation::Linear => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Activation::Tanh => "tanh",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Linear => "linear",
        }
    }
}

impl FromStr for Activation {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "linear" => Ok(Activation::Linear),
            other => Err(TrainingError::ModelConfiguration(format!(
                "unknown activation '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LossMetric {
    MeanSquaredError,
    MeanAbsoluteError,
}

impl LossMetric {
    pub fn loss(self, predictions: &[f64], targets: &[f64]) -> Option<f64> {
        match self {
            LossMetric::MeanSquaredError => mse_loss(predictions, targets),
            LossMetric::MeanAbsoluteError => mae_loss(predictions, targets),
        }
    }

    /// Gradient of the batch-mean loss with respect to each prediction.
    pub fn gradient(self, prediction: f64, target: f64, batch_len: usize) -> f64 {
        let n = batch_len as f64;
        match self {
            LossMetric::MeanSquaredError => 2.0 * (prediction - target) / n,
            LossMetric::MeanAbsoluteError => {
                let diff = prediction - target;
                if diff > 0.0 {
                    1.0 / n
                } else if diff < 0.0 {
                    -1.0 / n
                } else {
                    0.0
                }
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LossMetric::MeanSquaredError => "mean_squared_error",
            LossMetric::MeanAbsoluteError => "mean_absolute_error",
        }
    }
}

impl FromStr for LossMetric {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mse" | "mean_squared_error" => Ok(LossMetric::MeanSquaredError),
            "mae" | "mean_absolute_error" => Ok(LossMetric::MeanAbsoluteError),
            other => Err(TrainingError::ModelConfiguration(format!(
                "unknown loss metric '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adam,
    RmsProp,
}

impl OptimizerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Adam => "adam",
            OptimizerKind::RmsProp => "rmsprop",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adam" => Ok(OptimizerKind::Adam),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            other => Err(TrainingError::ModelConfiguration(format!(
                "unknown optimizer '{}'",
                other
            ))),
        }
    }
}

/// Per-parameter optimizer state, keyed by parameter name.
///
/// Moments are stored with dynamic dimensionality so matrices and bias
/// vectors share one map; the whole struct is serialized with the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Optimizer {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub rho: f64,
    pub epsilon: f64,
    pub t: usize,
    m: HashMap<String, ArrayD<f64>>,
    v: HashMap<String, ArrayD<f64>>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f64) -> Self {
        Optimizer {
            kind,
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            rho: 0.9,
            epsilon: 1e-7,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    /// Advances the step counter; call once per batch before `apply`.
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    pub fn apply<D: Dimension>(&mut self, name: &str, param: &mut Array<f64, D>, gradient: &Array<f64, D>) {
        let lr = self.learning_rate;
        let eps = self.epsilon;
        let grad = gradient.view().into_dyn();

        match self.kind {
            OptimizerKind::Sgd => {
                param.zip_mut_with(gradient, |p, &g| *p -= lr * g);
            }
            OptimizerKind::Adam => {
                let (beta1, beta2) = (self.beta1, self.beta2);
                let t = self.t.max(1) as i32;
                let bias1 = 1.0 - beta1.powi(t);
                let bias2 = 1.0 - beta2.powi(t);
                let m = self
                    .m
                    .entry(name.to_string())
                    .or_insert_with(|| ArrayD::zeros(IxDyn(grad.shape())));
                let v = self
                    .v
                    .entry(name.to_string())
                    .or_insert_with(|| ArrayD::zeros(IxDyn(grad.shape())));

                Zip::from(param.view_mut().into_dyn())
                    .and(m)
                    .and(v)
                    .and(&grad)
                    .for_each(|p, m, v, &g| {
                        *m = beta1 * *m + (1.0 - beta1) * g;
                        *v = beta2 * *v + (1.0 - beta2) * g * g;
                        let m_hat = *m / bias1;
                        let v_hat = *v / bias2;
                        *p -= lr * m_hat / (v_hat.sqrt() + eps);
                    });
            }
            OptimizerKind::RmsProp => {
                let rho = self.rho;
                let v = self
                    .v
                    .entry(name.to_string())
                    .or_insert_with(|| ArrayD::zeros(IxDyn(grad.shape())));

                Zip::from(param.view_mut().into_dyn())
                    .and(v)
                    .and(&grad)
                    .for_each(|p, v, &g| {
                        *v = rho * *v + (1.0 - rho) * g * g;
                        *p -= lr * g / (v.sqrt() + eps);
                    });
            }
        }
    }

    /// Checks that every stored moment matches the shape of a known parameter.
    pub fn validate_moments(&self, shapes: &HashMap<String, Vec<usize>>) -> Result<(), TrainingError> {
        for (name, moment) in self.m.iter().chain(self.v.iter()) {
            match shapes.get(name) {
                Some(shape) if shape.as_slice() == moment.shape() => {}
                Some(shape) => {
                    return Err(TrainingError::shape_mismatch(
                        &format!("optimizer moment '{}'", name),
                        shape,
                        moment.shape(),
                    ));
                }
                None => {
                    return Err(TrainingError::ModelConfiguration(format!(
                        "optimizer state references unknown parameter '{}'",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

pub fn sigmoid_scalar(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn mse_loss(predictions: &[f64], targets: &[f64]) -> Option<f64> {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return None;
    }
    let n = predictions.len() as f64;
    Some(
        predictions
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / n,
    )
}

pub fn mae_loss(predictions: &[f64], targets: &[f64]) -> Option<f64> {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return None;
    }
    let n = predictions.len() as f64;
    Some(
        predictions
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| (p - t).abs())
            .sum::<f64>()
            / n,
    )
}

pub fn validate_targets(targets: &[f64], name: &str) -> Result<(), TrainingError> {
    for (i, &value) in targets.iter().enumerate() {
        if !value.is_finite() {
            return Err(TrainingError::MalformedDocument(format!(
                "{} contains non-finite value at position {}",
                name, i
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut optimizer = Optimizer::new(OptimizerKind::Adam, 0.01);
        let mut param = Array1::from_vec(vec![1.0, -1.0, 0.5]);
        let gradient = Array1::from_vec(vec![0.1, -0.2, 0.0]);
        optimizer.begin_step();
        optimizer.apply("p", &mut param, &gradient);
        assert!(param[0] < 1.0);
        assert!(param[1] > -1.0);
        assert_eq!(param[2], 0.5);
    }

    #[test]
    fn test_sgd_step() {
        let mut optimizer = Optimizer::new(OptimizerKind::Sgd, 0.5);
        let mut param = Array2::from_elem((2, 2), 1.0);
        let gradient = Array2::from_elem((2, 2), 2.0);
        optimizer.begin_step();
        optimizer.apply("w", &mut param, &gradient);
        assert!(param.iter().all(|&p| (p - 0.0).abs() < 1e-12));
    }

    #[test]
    fn test_rmsprop_step_is_bounded() {
        let mut optimizer = Optimizer::new(OptimizerKind::RmsProp, 0.001);
        let mut param = Array1::from_vec(vec![0.0]);
        let gradient = Array1::from_vec(vec![100.0]);
        optimizer.begin_step();
        optimizer.apply("b", &mut param, &gradient);
        assert!(param[0] < 0.0);
        assert!(param[0] > -0.01);
    }

    #[test]
    fn test_moment_validation() {
        let mut optimizer = Optimizer::new(OptimizerKind::Adam, 0.01);
        let mut param = Array1::from_vec(vec![1.0, 2.0]);
        optimizer.begin_step();
        optimizer.apply("bias", &mut param, &Array1::from_vec(vec![0.1, 0.1]));

        let mut shapes = HashMap::new();
        shapes.insert("bias".to_string(), vec![2]);
        assert!(optimizer.validate_moments(&shapes).is_ok());

        shapes.insert("bias".to_string(), vec![3]);
        assert!(matches!(
            optimizer.validate_moments(&shapes),
            Err(TrainingError::ShapeMismatch { .. })
        ));

        shapes.clear();
        assert!(optimizer.validate_moments(&shapes).is_err());
    }

    #[test]
    fn test_activation_functions() {
        assert!(Activation::Sigmoid.apply(-1.0) < 0.5);
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < 1e-10);
        assert!(Activation::Tanh.apply(1.0) > 0.0);
        assert_eq!(Activation::Relu.apply(-1.0), 0.0);
        assert_eq!(Activation::Relu.derivative(2.0), 1.0);
        assert!((Activation::Tanh.derivative(0.0) - 1.0).abs() < 1e-12);
        assert_eq!(Activation::Linear.derivative(5.0), 1.0);
    }

    #[test]
    fn test_parsing_names() {
        assert_eq!("TANH".parse::<Activation>().unwrap(), Activation::Tanh);
        assert_eq!("mse".parse::<LossMetric>().unwrap(), LossMetric::MeanSquaredError);
        assert_eq!(
            "mean_absolute_error".parse::<LossMetric>().unwrap(),
            LossMetric::MeanAbsoluteError
        );
        assert_eq!("RMSprop".parse::<OptimizerKind>().unwrap(), OptimizerKind::RmsProp);
        assert!("softsign".parse::<Activation>().is_err());
        assert!("adagrad".parse::<OptimizerKind>().is_err());
    }

    #[test]
    fn test_loss_functions() {
        let predictions = vec![1.0, 2.0, 3.0];
        let targets = vec![1.1, 1.9, 3.1];
        let mse = mse_loss(&predictions, &targets).unwrap();
        let mae = mae_loss(&predictions, &targets).unwrap();
        assert!(mse > 0.0);
        assert!(mae > mse);
        assert!(mse_loss(&[], &[]).is_none());
        assert!(mae_loss(&[1.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_loss_gradient() {
        let g = LossMetric::MeanSquaredError.gradient(2.0, 1.0, 4);
        assert!((g - 0.5).abs() < 1e-12);
        assert_eq!(LossMetric::MeanAbsoluteError.gradient(0.0, 1.0, 2), -0.5);
    }

    #[test]
    fn test_target_validation() {
        assert!(validate_targets(&[1.0, 2.0, 3.0], "test").is_ok());
        assert!(validate_targets(&[1.0, f64::INFINITY], "test").is_err());
        assert!(validate_targets(&[f64::NAN], "test").is_err());
    }
}
