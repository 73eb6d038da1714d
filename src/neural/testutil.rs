// projeto: lstmdbtrain
// file: src/neural/testutil.rs
// Fixtures shared by the unit tests

use serde_json::{Value, json};

use crate::neural::config::HarnessConfig;
use crate::neural::db::DocumentStore;

/// A sample whose rows are `target * 0.01 + step * 0.1 + col * 0.001`.
pub fn sample_doc(target: f64, time_steps: usize, features: usize) -> Value {
    let rows: Vec<Vec<f64>> = (0..time_steps)
        .map(|t| {
            (0..features)
                .map(|c| target * 0.01 + t as f64 * 0.1 + c as f64 * 0.001)
                .collect()
        })
        .collect();
    json!({ "data": rows, "target": target })
}

/// Inserts `n` samples with targets `0..n` and a `split` tag of even/odd.
pub fn seed_samples(store: &dyn DocumentStore, collection: &str, n: usize, time_steps: usize, features: usize) {
    for i in 0..n {
        let mut doc = sample_doc(i as f64, time_steps, features);
        doc["split"] = json!(if i % 2 == 0 { "even" } else { "odd" });
        store.insert(collection, &doc, None).unwrap();
    }
}

/// Small config matching the 10 documents / batch 5 / 3 steps / 4 columns
/// scenario.
pub fn small_config() -> HarnessConfig {
    HarnessConfig {
        batch_size: 5,
        time_steps: 3,
        dimensionality: 4,
        layers: 2,
        int_layer_dim: 4,
        epochs: 1,
        learning_rate: 0.01,
        coll: "train".to_string(),
        test_coll: "test".to_string(),
        model_coll: "models".to_string(),
        seed: Some(7),
        ..HarnessConfig::default()
    }
}
