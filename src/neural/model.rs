// projeto: lstmdbtrain
// file: src/neural/model.rs
// Stacked LSTM regressor: topology, forward pass, backpropagation through time

use chrono::Utc;
use log::{debug, info, trace};
use ndarray::{Array1, Array2, Array3, Axis, Zip, concatenate, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::neural::config::HarnessConfig;
use crate::neural::data::Batch;
use crate::neural::storage::{EXPECTED_MODEL_TYPE, ModelSnapshot};
use crate::neural::utils::{Activation, LossMetric, Optimizer, OptimizerKind, TrainingError, sigmoid_scalar};

/// Logger target of this module, capped separately from the rest of the crate.
pub const LOG_TARGET: &str = module_path!();

/// What the loops need from a model: one gradient step, a non-mutating
/// score, and inference.
pub trait TrainableModel {
    fn train_on_batch(&mut self, batch: &Batch) -> Result<f64, TrainingError>;
    fn evaluate(&self, batch: &Batch) -> Result<f64, TrainingError>;
    fn predict(&self, batch: &Batch) -> Result<Array1<f64>, TrainingError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelTopology {
    pub batch_size: usize,
    pub time_steps: usize,
    pub features: usize,
    pub layers: usize,
    pub hidden: usize,
    pub activation: Activation,
    pub loss: LossMetric,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
}

impl ModelTopology {
    pub fn from_config(config: &HarnessConfig) -> Result<Self, TrainingError> {
        let topology = ModelTopology {
            batch_size: config.batch_size,
            time_steps: config.time_steps,
            features: config.feature_dim(),
            layers: config.layers,
            hidden: config.int_layer_dim,
            activation: config.activation_kind()?,
            loss: config.loss_kind()?,
            optimizer: config.optimizer_kind()?,
            learning_rate: config.learning_rate,
        };
        topology.validate()?;
        Ok(topology)
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let dims = [
            ("batch_size", self.batch_size),
            ("time_steps", self.time_steps),
            ("features", self.features),
            ("layers", self.layers),
            ("hidden", self.hidden),
        ];
        if let Some((name, _)) = dims.iter().find(|(_, v)| *v == 0) {
            return Err(TrainingError::ModelConfiguration(format!("{} must be greater than zero", name)));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainingError::ModelConfiguration(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }

    pub fn input_shape(&self) -> (usize, usize, usize) {
        (self.batch_size, self.time_steps, self.features)
    }
}

/// Fused gate weights in `[input, forget, cell, output]` column order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LstmLayerWeights {
    pub kernel: Array2<f64>,    // (input_dim, 4 * hidden)
    pub recurrent: Array2<f64>, // (hidden, 4 * hidden)
    pub bias: Array1<f64>,      // (4 * hidden)
}

impl LstmLayerWeights {
    fn zeros_like(other: &LstmLayerWeights) -> Self {
        LstmLayerWeights {
            kernel: Array2::zeros(other.kernel.raw_dim()),
            recurrent: Array2::zeros(other.recurrent.raw_dim()),
            bias: Array1::zeros(other.bias.raw_dim()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DenseWeights {
    pub kernel: Array2<f64>, // (hidden, 1)
    pub bias: Array1<f64>,   // (1)
}

/// Serializable form of a complete model: topology, weights and optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub topology: ModelTopology,
    pub lstm_layers: Vec<LstmLayerWeights>,
    pub output: DenseWeights,
    pub optimizer: Optimizer,
}

#[derive(Debug, Clone)]
pub struct StackedLstm {
    topology: ModelTopology,
    layers: Vec<LstmLayerWeights>,
    output: DenseWeights,
    optimizer: Optimizer,
}

struct StepCache {
    x: Array2<f64>,
    h_prev: Array2<f64>,
    c_prev: Array2<f64>,
    i: Array2<f64>,
    f: Array2<f64>,
    g: Array2<f64>,
    o: Array2<f64>,
    z_g: Array2<f64>,
    c: Array2<f64>,
}

struct ForwardPass {
    caches: Vec<Vec<StepCache>>,
    last_hidden: Array2<f64>,
    predictions: Array1<f64>,
}

pub(crate) struct Gradients {
    pub(crate) layers: Vec<LstmLayerWeights>,
    pub(crate) output: DenseWeights,
}

fn glorot_uniform(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.random_range(-limit..limit))
}

impl StackedLstm {
    /// Fresh weights: Glorot-uniform kernels, zero biases, forget-gate bias 1.
    pub fn new(topology: ModelTopology, seed: Option<u64>) -> Result<Self, TrainingError> {
        topology.validate()?;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let hidden = topology.hidden;

        let layers = (0..topology.layers)
            .map(|idx| {
                let input_dim = if idx == 0 { topology.features } else { hidden };
                let mut bias = Array1::zeros(4 * hidden);
                bias.slice_mut(s![hidden..2 * hidden]).fill(1.0);
                LstmLayerWeights {
                    kernel: glorot_uniform(&mut rng, input_dim, 4 * hidden),
                    recurrent: glorot_uniform(&mut rng, hidden, 4 * hidden),
                    bias,
                }
            })
            .collect();

        let output = DenseWeights {
            kernel: glorot_uniform(&mut rng, hidden, 1),
            bias: Array1::zeros(1),
        };
        let optimizer = Optimizer::new(topology.optimizer, topology.learning_rate);

        Ok(StackedLstm {
            topology,
            layers,
            output,
            optimizer,
        })
    }

    /// Builds a new instance from its serialized form after checking every
    /// shape against the declared topology.
    pub fn from_state(state: ModelState) -> Result<Self, TrainingError> {
        let ModelState {
            topology,
            lstm_layers,
            output,
            optimizer,
        } = state;
        topology.validate()?;

        if lstm_layers.len() != topology.layers {
            return Err(TrainingError::shape_mismatch("recurrent layer count", topology.layers, lstm_layers.len()));
        }
        let hidden = topology.hidden;
        for (idx, layer) in lstm_layers.iter().enumerate() {
            let input_dim = if idx == 0 { topology.features } else { hidden };
            check_dim(&format!("lstm_{} kernel", idx), (input_dim, 4 * hidden), layer.kernel.dim())?;
            check_dim(&format!("lstm_{} recurrent", idx), (hidden, 4 * hidden), layer.recurrent.dim())?;
            check_dim(&format!("lstm_{} bias", idx), 4 * hidden, layer.bias.len())?;
        }
        check_dim("output kernel", (hidden, 1), output.kernel.dim())?;
        check_dim("output bias", 1, output.bias.len())?;

        let all_finite = lstm_layers
            .iter()
            .flat_map(|l| l.kernel.iter().chain(l.recurrent.iter()).chain(l.bias.iter()))
            .chain(output.kernel.iter())
            .chain(output.bias.iter())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(TrainingError::ModelConfiguration("model weights contain non-finite values".to_string()));
        }

        if optimizer.kind != topology.optimizer {
            return Err(TrainingError::ModelConfiguration(format!(
                "optimizer state is {:?} but topology declares {:?}",
                optimizer.kind, topology.optimizer
            )));
        }

        let model = StackedLstm {
            topology,
            layers: lstm_layers,
            output,
            optimizer,
        };
        model.optimizer.validate_moments(&model.parameter_shapes())?;
        Ok(model)
    }

    pub fn to_state(&self) -> ModelState {
        ModelState {
            topology: self.topology.clone(),
            lstm_layers: self.layers.clone(),
            output: self.output.clone(),
            optimizer: self.optimizer.clone(),
        }
    }

    pub fn topology(&self) -> &ModelTopology {
        &self.topology
    }

    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.kernel.len() + l.recurrent.len() + l.bias.len())
            .sum::<usize>()
            + self.output.kernel.len()
            + self.output.bias.len()
    }

    pub fn parameter_shapes(&self) -> HashMap<String, Vec<usize>> {
        let mut shapes = HashMap::new();
        for (idx, layer) in self.layers.iter().enumerate() {
            shapes.insert(format!("lstm_{}/kernel", idx), layer.kernel.shape().to_vec());
            shapes.insert(format!("lstm_{}/recurrent", idx), layer.recurrent.shape().to_vec());
            shapes.insert(format!("lstm_{}/bias", idx), layer.bias.shape().to_vec());
        }
        shapes.insert("dense/kernel".to_string(), self.output.kernel.shape().to_vec());
        shapes.insert("dense/bias".to_string(), self.output.bias.shape().to_vec());
        shapes
    }

    fn check_input(&self, features: &Array3<f64>) -> Result<(), TrainingError> {
        if features.dim() != self.topology.input_shape() {
            return Err(TrainingError::shape_mismatch(
                "model input",
                self.topology.input_shape(),
                features.dim(),
            ));
        }
        Ok(())
    }

    fn forward_layer(&self, layer: &LstmLayerWeights, inputs: &[Array2<f64>]) -> (Vec<Array2<f64>>, Vec<StepCache>) {
        let hidden = self.topology.hidden;
        let act = self.topology.activation;
        let batch = inputs.first().map(|x| x.nrows()).unwrap_or(0);

        let mut h = Array2::zeros((batch, hidden));
        let mut c = Array2::zeros((batch, hidden));
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut caches = Vec::with_capacity(inputs.len());

        for x in inputs {
            let z = x.dot(&layer.kernel) + h.dot(&layer.recurrent) + &layer.bias;
            let i = z.slice(s![.., 0..hidden]).mapv(sigmoid_scalar);
            let f = z.slice(s![.., hidden..2 * hidden]).mapv(sigmoid_scalar);
            let z_g = z.slice(s![.., 2 * hidden..3 * hidden]).to_owned();
            let g = z_g.mapv(|v| act.apply(v));
            let o = z.slice(s![.., 3 * hidden..]).mapv(sigmoid_scalar);

            let c_next = &f * &c + &i * &g;
            let h_next = &o * &c_next.mapv(|v| act.apply(v));

            caches.push(StepCache {
                x: x.clone(),
                h_prev: h,
                c_prev: c,
                i,
                f,
                g,
                o,
                z_g,
                c: c_next.clone(),
            });
            h = h_next;
            c = c_next;
            outputs.push(h.clone());
        }

        (outputs, caches)
    }

    fn backward_layer(
        &self,
        layer: &LstmLayerWeights,
        caches: &[StepCache],
        d_outputs: &[Array2<f64>],
    ) -> Result<(LstmLayerWeights, Vec<Array2<f64>>), TrainingError> {
        let act = self.topology.activation;
        let mut grads = LstmLayerWeights::zeros_like(layer);
        let mut d_inputs = Vec::with_capacity(caches.len());

        let (batch, hidden) = match caches.first() {
            Some(step) => step.h_prev.dim(),
            None => return Ok((grads, d_inputs)),
        };
        let mut dh_next = Array2::<f64>::zeros((batch, hidden));
        let mut dc_next = Array2::<f64>::zeros((batch, hidden));

        for (step, d_out) in caches.iter().zip(d_outputs.iter()).rev() {
            let dh = d_out + &dh_next;
            let d_o = &dh * &step.c.mapv(|v| act.apply(v));
            let dc = &dh * &step.o * &step.c.mapv(|v| act.derivative(v)) + &dc_next;

            let d_i = &dc * &step.g;
            let d_g = &dc * &step.i;
            let d_f = &dc * &step.c_prev;
            dc_next = &dc * &step.f;

            let dz_i = d_i * &step.i.mapv(|s| s * (1.0 - s));
            let dz_f = d_f * &step.f.mapv(|s| s * (1.0 - s));
            let dz_g = d_g * &step.z_g.mapv(|v| act.derivative(v));
            let dz_o = d_o * &step.o.mapv(|s| s * (1.0 - s));
            let dz = concatenate(Axis(1), &[dz_i.view(), dz_f.view(), dz_g.view(), dz_o.view()])?;

            grads.kernel += &step.x.t().dot(&dz);
            grads.recurrent += &step.h_prev.t().dot(&dz);
            grads.bias += &dz.sum_axis(Axis(0));

            d_inputs.push(dz.dot(&layer.kernel.t()));
            dh_next = dz.dot(&layer.recurrent.t());
        }

        d_inputs.reverse();
        Ok((grads, d_inputs))
    }

    fn forward(&self, features: &Array3<f64>) -> Result<ForwardPass, TrainingError> {
        self.check_input(features)?;

        let mut sequence: Vec<Array2<f64>> = (0..self.topology.time_steps)
            .map(|t| features.index_axis(Axis(1), t).to_owned())
            .collect();
        let mut caches = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            let (outputs, layer_cache) = self.forward_layer(layer, &sequence);
            caches.push(layer_cache);
            sequence = outputs;
        }

        let last_hidden = sequence
            .pop()
            .ok_or_else(|| TrainingError::ModelConfiguration("empty input sequence".to_string()))?;
        let predictions = (last_hidden.dot(&self.output.kernel) + &self.output.bias)
            .column(0)
            .to_owned();

        Ok(ForwardPass {
            caches,
            last_hidden,
            predictions,
        })
    }

    fn batch_loss(&self, predictions: &Array1<f64>, batch: &Batch) -> Result<f64, TrainingError> {
        self.topology
            .loss
            .loss(&predictions.to_vec(), &batch.targets.to_vec())
            .ok_or_else(|| TrainingError::shape_mismatch("targets", predictions.len(), batch.targets.len()))
    }

    pub(crate) fn gradients(&self, batch: &Batch) -> Result<(f64, Gradients), TrainingError> {
        let pass = self.forward(&batch.features)?;
        let loss = self.batch_loss(&pass.predictions, batch)?;
        let n = batch.len();
        let metric = self.topology.loss;

        let dy = Zip::from(&pass.predictions)
            .and(&batch.targets)
            .map_collect(|&p, &t| metric.gradient(p, t, n));
        let dy_sum = dy.sum();
        let dy = dy.insert_axis(Axis(1));

        let output = DenseWeights {
            kernel: pass.last_hidden.t().dot(&dy),
            bias: Array1::from_elem(1, dy_sum),
        };
        let dh_last = dy.dot(&self.output.kernel.t());

        let steps = self.topology.time_steps;
        let mut d_outputs: Vec<Array2<f64>> = (0..steps)
            .map(|_| Array2::zeros(dh_last.raw_dim()))
            .collect();
        d_outputs[steps - 1] = dh_last;

        let mut layer_grads = Vec::with_capacity(self.layers.len());
        for (layer, caches) in self.layers.iter().zip(pass.caches.iter()).rev() {
            let (grads, d_inputs) = self.backward_layer(layer, caches, &d_outputs)?;
            layer_grads.push(grads);
            d_outputs = d_inputs;
        }
        layer_grads.reverse();

        Ok((
            loss,
            Gradients {
                layers: layer_grads,
                output,
            },
        ))
    }
}

fn check_dim<D: PartialEq + std::fmt::Debug>(what: &str, expected: D, actual: D) -> Result<(), TrainingError> {
    if expected != actual {
        return Err(TrainingError::shape_mismatch(what, expected, actual));
    }
    Ok(())
}

impl TrainableModel for StackedLstm {
    fn train_on_batch(&mut self, batch: &Batch) -> Result<f64, TrainingError> {
        let (loss, grads) = self.gradients(batch)?;

        self.optimizer.begin_step();
        for (idx, (layer, grad)) in self.layers.iter_mut().zip(grads.layers.iter()).enumerate() {
            self.optimizer.apply(&format!("lstm_{}/kernel", idx), &mut layer.kernel, &grad.kernel);
            self.optimizer.apply(&format!("lstm_{}/recurrent", idx), &mut layer.recurrent, &grad.recurrent);
            self.optimizer.apply(&format!("lstm_{}/bias", idx), &mut layer.bias, &grad.bias);
        }
        self.optimizer.apply("dense/kernel", &mut self.output.kernel, &grads.output.kernel);
        self.optimizer.apply("dense/bias", &mut self.output.bias, &grads.output.bias);

        trace!("train_on_batch step {} loss {:.6}", self.optimizer.t, loss);
        Ok(loss)
    }

    fn evaluate(&self, batch: &Batch) -> Result<f64, TrainingError> {
        let pass = self.forward(&batch.features)?;
        self.batch_loss(&pass.predictions, batch)
    }

    fn predict(&self, batch: &Batch) -> Result<Array1<f64>, TrainingError> {
        Ok(self.forward(&batch.features)?.predictions)
    }
}

/// Model factory: `layers - 1` sequence-returning LSTM layers, a final LSTM
/// layer returning its last state, and a width-1 dense head.
pub fn create_model(config: &HarnessConfig) -> Result<ModelSnapshot, TrainingError> {
    let topology = ModelTopology::from_config(config)?;

    info!("🛠️ [Model] Creating stacked LSTM");
    info!("   ├── layers: {}", topology.layers);
    info!("   ├── hidden: {}", topology.hidden);
    info!("   ├── batchInShape: {:?}", topology.input_shape());
    info!("   ├── activation: {}", topology.activation.as_str());
    info!("   ├── loss: {}", topology.loss.as_str());
    info!(
        "   └── optimizer: {} (lr {})",
        topology.optimizer.as_str(),
        topology.learning_rate
    );

    let model = StackedLstm::new(topology, config.seed)?;
    debug!("✅ [Model] LSTM created with {} parameters", model.num_parameters());

    Ok(ModelSnapshot {
        kind: EXPECTED_MODEL_TYPE.to_string(),
        epochs: 0,
        loss: None,
        created_at: Utc::now(),
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::testutil::small_config;

    fn topology(layers: usize, activation: Activation) -> ModelTopology {
        ModelTopology {
            batch_size: 2,
            time_steps: 3,
            features: 2,
            layers,
            hidden: 3,
            activation,
            loss: LossMetric::MeanSquaredError,
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.01,
        }
    }

    fn batch(values: &[f64], targets: &[f64], shape: (usize, usize, usize)) -> Batch {
        Batch {
            features: Array3::from_shape_vec(shape, values.to_vec()).unwrap(),
            targets: Array1::from_vec(targets.to_vec()),
        }
    }

    fn fixed_batch() -> Batch {
        let values: Vec<f64> = (0..12).map(|v| (v as f64 * 0.37).sin()).collect();
        batch(&values, &[0.3, -0.2], (2, 3, 2))
    }

    #[test]
    fn test_factory_topology() {
        let mut config = small_config();
        config.layers = 3;
        let snapshot = create_model(&config).unwrap();
        assert_eq!(snapshot.kind, "lstm");
        assert_eq!(snapshot.epochs, 0);
        assert!(snapshot.loss.is_none());

        let model = &snapshot.model;
        assert_eq!(model.layers.len(), 3);
        assert_eq!(model.layers[0].kernel.dim(), (3, 16));
        assert_eq!(model.layers[1].kernel.dim(), (4, 16));
        assert_eq!(model.layers[2].recurrent.dim(), (4, 16));
        assert_eq!(model.output.kernel.dim(), (4, 1));
        assert_eq!(model.topology().input_shape(), (5, 3, 3));
        // (3*16 + 4*16 + 16) + 2 * (4*16 + 4*16 + 16) + 4 + 1
        assert_eq!(model.num_parameters(), 421);
    }

    #[test]
    fn test_factory_rejects_bad_config() {
        let mut config = small_config();
        config.layers = 0;
        assert!(matches!(create_model(&config), Err(TrainingError::ModelConfiguration(_))));

        let mut config = small_config();
        config.optimizer = "adagrad".to_string();
        assert!(create_model(&config).is_err());
    }

    #[test]
    fn test_seeded_models_are_identical() {
        let a = StackedLstm::new(topology(2, Activation::Tanh), Some(11)).unwrap();
        let b = StackedLstm::new(topology(2, Activation::Tanh), Some(11)).unwrap();
        assert_eq!(a.layers, b.layers);
        assert_eq!(a.output, b.output);
    }

    #[test]
    fn test_predict_shape_and_input_check() {
        let model = StackedLstm::new(topology(2, Activation::Tanh), Some(1)).unwrap();
        let predictions = model.predict(&fixed_batch()).unwrap();
        assert_eq!(predictions.len(), 2);

        let wrong = batch(&[0.0; 8], &[0.0, 0.0], (2, 2, 2));
        assert!(matches!(model.predict(&wrong), Err(TrainingError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_evaluate_does_not_mutate() {
        let model = StackedLstm::new(topology(1, Activation::Tanh), Some(3)).unwrap();
        let before = model.to_state();
        let first = model.evaluate(&fixed_batch()).unwrap();
        let second = model.evaluate(&fixed_batch()).unwrap();
        assert_eq!(first, second);
        assert_eq!(before.lstm_layers, model.layers);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        for activation in [Activation::Tanh, Activation::Sigmoid] {
            let model = StackedLstm::new(topology(2, activation), Some(5)).unwrap();
            let batch = fixed_batch();
            let (_, grads) = model.gradients(&batch).unwrap();
            let eps = 1e-6;

            let numeric = |mutate: &dyn Fn(&mut StackedLstm, f64)| {
                let mut plus = model.clone();
                mutate(&mut plus, eps);
                let mut minus = model.clone();
                mutate(&mut minus, -eps);
                (plus.evaluate(&batch).unwrap() - minus.evaluate(&batch).unwrap()) / (2.0 * eps)
            };
            let close = |analytic: f64, numeric: f64| {
                assert!(
                    (analytic - numeric).abs() <= 1e-7 + 1e-4 * numeric.abs(),
                    "analytic {} vs numeric {} ({:?})",
                    analytic,
                    numeric,
                    activation
                );
            };

            close(grads.layers[0].kernel[[0, 1]], numeric(&|m, d| m.layers[0].kernel[[0, 1]] += d));
            close(grads.layers[0].kernel[[1, 7]], numeric(&|m, d| m.layers[0].kernel[[1, 7]] += d));
            close(grads.layers[0].bias[4], numeric(&|m, d| m.layers[0].bias[4] += d));
            close(grads.layers[1].recurrent[[2, 5]], numeric(&|m, d| m.layers[1].recurrent[[2, 5]] += d));
            close(grads.layers[1].kernel[[0, 10]], numeric(&|m, d| m.layers[1].kernel[[0, 10]] += d));
            close(grads.layers[0].recurrent[[1, 11]], numeric(&|m, d| m.layers[0].recurrent[[1, 11]] += d));
            close(grads.output.kernel[[1, 0]], numeric(&|m, d| m.output.kernel[[1, 0]] += d));
            close(grads.output.bias[0], numeric(&|m, d| m.output.bias[0] += d));
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let topology = ModelTopology {
            batch_size: 8,
            time_steps: 3,
            features: 2,
            layers: 2,
            hidden: 6,
            activation: Activation::Tanh,
            loss: LossMetric::MeanSquaredError,
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.01,
        };
        let mut model = StackedLstm::new(topology, Some(42)).unwrap();

        let values: Vec<f64> = (0..48).map(|v| ((v * 7 % 11) as f64 / 11.0) - 0.5).collect();
        let features = Array3::from_shape_vec((8, 3, 2), values).unwrap();
        let targets = features
            .index_axis(Axis(1), 2)
            .column(0)
            .mapv(|x| 0.8 + 0.2 * x);
        let data = Batch { features, targets };

        let initial = model.evaluate(&data).unwrap();
        for _ in 0..200 {
            model.train_on_batch(&data).unwrap();
        }
        let trained = model.evaluate(&data).unwrap();
        assert!(trained < initial * 0.5, "loss {} -> {}", initial, trained);
    }

    #[test]
    fn test_state_round_trip_and_validation() {
        let mut model = StackedLstm::new(topology(2, Activation::Tanh), Some(9)).unwrap();
        model.train_on_batch(&fixed_batch()).unwrap();

        let restored = StackedLstm::from_state(model.to_state()).unwrap();
        assert_eq!(restored.layers, model.layers);
        assert_eq!(restored.optimizer.t, 1);
        assert_eq!(
            restored.predict(&fixed_batch()).unwrap(),
            model.predict(&fixed_batch()).unwrap()
        );

        let mut broken = model.to_state();
        broken.lstm_layers[1].kernel = Array2::zeros((2, 12));
        assert!(matches!(
            StackedLstm::from_state(broken),
            Err(TrainingError::ShapeMismatch { .. })
        ));

        let mut missing = model.to_state();
        missing.lstm_layers.pop();
        assert!(StackedLstm::from_state(missing).is_err());

        let mut nan = model.to_state();
        nan.output.bias[0] = f64::NAN;
        assert!(matches!(
            StackedLstm::from_state(nan),
            Err(TrainingError::ModelConfiguration(_))
        ));
    }
}
