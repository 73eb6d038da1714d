// projeto: lstmdbtrain
// file: src/neural/storage.rs
// Model registry: snapshot persistence and retrieval through the document store

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;

use crate::neural::db::{DocumentStore, Filter};
use crate::neural::model::{ModelState, StackedLstm};
use crate::neural::utils::TrainingError;

pub const EXPECTED_MODEL_TYPE: &str = "lstm";

/// A model bound to its registry metadata.
#[derive(Debug, Clone)]
pub struct ModelSnapshot<M = StackedLstm> {
    pub kind: String,
    pub epochs: usize,
    pub loss: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub model: M,
}

/// Turns a model into the opaque weights blob and back.
pub trait ModelCodec {
    fn name(&self) -> &'static str;
    fn encode(&self, model: &StackedLstm) -> Result<Vec<u8>, TrainingError>;
    fn decode(&self, bytes: &[u8]) -> Result<StackedLstm, TrainingError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl ModelCodec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode(&self, model: &StackedLstm) -> Result<Vec<u8>, TrainingError> {
        bincode::serde::encode_to_vec(model.to_state(), bincode::config::standard())
            .map_err(|e| TrainingError::Serialization(format!("Failed to encode model: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<StackedLstm, TrainingError> {
        let (state, _): (ModelState, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| TrainingError::Serialization(format!("Failed to decode model: {}", e)))?;
        StackedLstm::from_state(state)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl ModelCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, model: &StackedLstm) -> Result<Vec<u8>, TrainingError> {
        serde_json::to_vec(&model.to_state())
            .map_err(|e| TrainingError::Serialization(format!("Failed to encode model: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<StackedLstm, TrainingError> {
        let state: ModelState = serde_json::from_slice(bytes)
            .map_err(|e| TrainingError::Serialization(format!("Failed to decode model: {}", e)))?;
        StackedLstm::from_state(state)
    }
}

pub struct ModelRegistry<'a> {
    store: &'a dyn DocumentStore,
    collection: String,
    codec: Box<dyn ModelCodec>,
}

impl<'a> ModelRegistry<'a> {
    pub fn new(store: &'a dyn DocumentStore, collection: &str) -> Self {
        Self::with_codec(store, collection, Box::new(BincodeCodec))
    }

    pub fn with_codec(store: &'a dyn DocumentStore, collection: &str, codec: Box<dyn ModelCodec>) -> Self {
        ModelRegistry {
            store,
            collection: collection.to_string(),
            codec,
        }
    }

    /// Newest document in `collection` matching `filter`, as stored.
    pub fn get_most_recent(&self, filter: &Filter, collection: &str) -> Result<Option<Value>, TrainingError> {
        Ok(self.store.get_most_recent(collection, filter)?.map(|doc| doc.body))
    }

    /// Resolves the newest snapshot matching `filter`. The `type` field and
    /// the `epochs` / `loss` metadata are checked before any weights are decoded.
    pub fn get_model(&self, filter: &Filter) -> Result<ModelSnapshot, TrainingError> {
        let doc = self
            .store
            .get_most_recent(&self.collection, filter)?
            .ok_or_else(|| TrainingError::ModelNotFound {
                collection: self.collection.clone(),
                query: filter.to_string(),
            })?;

        let kind = doc.body.get("type").and_then(Value::as_str).unwrap_or("");
        if kind != EXPECTED_MODEL_TYPE {
            return Err(TrainingError::TypeMismatch {
                query: filter.to_string(),
                expected: EXPECTED_MODEL_TYPE.to_string(),
                actual: kind.to_string(),
            });
        }

        let codec = doc.body.get("codec").and_then(Value::as_str).unwrap_or(self.codec.name());
        if codec != self.codec.name() {
            return Err(TrainingError::Serialization(format!(
                "snapshot {} was written with codec '{}', registry uses '{}'",
                doc.id,
                codec,
                self.codec.name()
            )));
        }
        let epochs = doc.body.get("epochs").and_then(Value::as_u64).ok_or_else(|| {
            TrainingError::MalformedDocument(format!(
                "snapshot {} needs a non-negative integer 'epochs', got {}",
                doc.id,
                doc.body.get("epochs").unwrap_or(&Value::Null)
            ))
        })? as usize;
        let loss = match doc.body.get("loss") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_f64().ok_or_else(|| {
                TrainingError::MalformedDocument(format!("snapshot {} has a non-numeric 'loss': {}", doc.id, value))
            })?),
        };

        let blob = doc
            .blob
            .as_deref()
            .ok_or_else(|| TrainingError::Serialization(format!("snapshot {} has no weights", doc.id)))?;
        let model = self.codec.decode(blob)?;
        info!(
            "📂 [Registry] Loaded snapshot {} from '{}' (epochs {}, loss {:?})",
            doc.id, self.collection, epochs, loss
        );

        Ok(ModelSnapshot {
            kind: EXPECTED_MODEL_TYPE.to_string(),
            epochs,
            loss,
            created_at: doc.created_at,
            model,
        })
    }

    /// Inserts a new snapshot document; earlier ones are never touched.
    pub fn save(&self, snapshot: &ModelSnapshot) -> Result<i64, TrainingError> {
        let blob = self.codec.encode(&snapshot.model)?;
        let topology = snapshot.model.topology();
        let body = json!({
            "type": snapshot.kind,
            "epochs": snapshot.epochs,
            "loss": snapshot.loss,
            "createdAt": snapshot.created_at.to_rfc3339(),
            "codec": self.codec.name(),
            "layers": topology.layers,
            "intLayerDim": topology.hidden,
            "timeSteps": topology.time_steps,
            "dimensionality": topology.features + 1,
            "batchSize": topology.batch_size,
            "activation": topology.activation.as_str(),
            "lossMetric": topology.loss.as_str(),
            "optimizer": topology.optimizer.as_str(),
        });

        let id = self.store.insert(&self.collection, &body, Some(&blob))?;
        info!(
            "💾 [Registry] Saved snapshot {} to '{}' (epochs {}, {} bytes)",
            id,
            self.collection,
            snapshot.epochs,
            blob.len()
        );
        Ok(id)
    }
}

/// Reads a JSON filter object from `path`.
pub fn load_pipe(path: &Path) -> Result<Filter, TrainingError> {
    debug!("[Registry] Loading pipeline from {}", path.display());
    let text = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| TrainingError::InvalidFilter(format!("{}: {}", path.display(), e)))?;
    Filter::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::model::create_model;
    use crate::neural::sqlite_store::SqliteStore;
    use crate::neural::testutil::small_config;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_then_get_model() {
        let store = SqliteStore::open_in_memory().unwrap();
        let registry = ModelRegistry::new(&store, "models");
        let mut snapshot = create_model(&small_config()).unwrap();
        snapshot.epochs = 3;
        snapshot.loss = Some(0.25);
        registry.save(&snapshot).unwrap();

        let loaded = registry.get_model(&Filter::all()).unwrap();
        assert_eq!(loaded.kind, "lstm");
        assert_eq!(loaded.epochs, 3);
        assert_eq!(loaded.loss, Some(0.25));
        assert_eq!(loaded.model.topology(), snapshot.model.topology());
        assert_eq!(loaded.model.to_state().lstm_layers, snapshot.model.to_state().lstm_layers);
    }

    #[test]
    fn test_newest_snapshot_wins() {
        let store = SqliteStore::open_in_memory().unwrap();
        let registry = ModelRegistry::new(&store, "models");
        let mut snapshot = create_model(&small_config()).unwrap();
        for epochs in [1, 2, 5] {
            snapshot.epochs = epochs;
            registry.save(&snapshot).unwrap();
        }
        assert_eq!(registry.get_model(&Filter::all()).unwrap().epochs, 5);
        assert_eq!(
            registry.get_model(&Filter::all().with("epochs", 2)).unwrap().epochs,
            2
        );

        let raw = registry.get_most_recent(&Filter::all(), "models").unwrap().unwrap();
        assert_eq!(raw["intLayerDim"], 4);
        assert_eq!(raw["dimensionality"], 4);
        assert_eq!(raw["codec"], "bincode");
    }

    #[test]
    fn test_type_mismatch_and_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert("models", &json!({"type": "gru", "epochs": 1}), Some(&[0u8; 4])).unwrap();
        let registry = ModelRegistry::new(&store, "models");

        match registry.get_model(&Filter::all()) {
            Err(TrainingError::TypeMismatch { expected, actual, .. }) => {
                assert_eq!(expected, "lstm");
                assert_eq!(actual, "gru");
            }
            other => panic!("expected TypeMismatch, got {:?}", other.map(|s| s.epochs)),
        }
        assert!(matches!(
            registry.get_model(&Filter::all().with("type", "lstm")),
            Err(TrainingError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn test_corrupt_blob_is_fatal() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert("models", &json!({"type": "lstm", "epochs": 1, "codec": "bincode"}), Some(&[1, 2, 3]))
            .unwrap();
        let registry = ModelRegistry::new(&store, "models");
        assert!(matches!(
            registry.get_model(&Filter::all()),
            Err(TrainingError::Serialization(_))
        ));

        store.insert("models", &json!({"type": "lstm", "epochs": 2}), None).unwrap();
        assert!(matches!(
            registry.get_model(&Filter::all()),
            Err(TrainingError::Serialization(_))
        ));
    }

    #[test]
    fn test_bad_epochs_is_fatal() {
        let blob = BincodeCodec.encode(&create_model(&small_config()).unwrap().model).unwrap();
        for epochs in [json!("7"), json!(-1), json!(2.5), Value::Null] {
            let store = SqliteStore::open_in_memory().unwrap();
            store
                .insert("models", &json!({"type": "lstm", "epochs": epochs.clone(), "codec": "bincode"}), Some(&blob))
                .unwrap();
            let result = ModelRegistry::new(&store, "models").get_model(&Filter::all());
            assert!(
                matches!(result, Err(TrainingError::MalformedDocument(_))),
                "epochs {} was accepted",
                epochs
            );
        }

        let store = SqliteStore::open_in_memory().unwrap();
        store.insert("models", &json!({"type": "lstm", "codec": "bincode"}), Some(&blob)).unwrap();
        store
            .insert("other", &json!({"type": "lstm", "epochs": 2, "loss": "low"}), Some(&blob))
            .unwrap();
        assert!(matches!(
            ModelRegistry::new(&store, "models").get_model(&Filter::all()),
            Err(TrainingError::MalformedDocument(_))
        ));
        assert!(matches!(
            ModelRegistry::new(&store, "other").get_model(&Filter::all()),
            Err(TrainingError::MalformedDocument(_))
        ));

        store
            .insert("models", &json!({"type": "lstm", "epochs": 4, "loss": null}), Some(&blob))
            .unwrap();
        let loaded = ModelRegistry::new(&store, "models").get_model(&Filter::all()).unwrap();
        assert_eq!((loaded.epochs, loaded.loss), (4, None));
    }

    #[test]
    fn test_codecs_round_trip_and_do_not_mix() {
        let snapshot = create_model(&small_config()).unwrap();
        for codec in [Box::new(BincodeCodec) as Box<dyn ModelCodec>, Box::new(JsonCodec)] {
            let bytes = codec.encode(&snapshot.model).unwrap();
            let decoded = codec.decode(&bytes).unwrap();
            assert_eq!(decoded.topology(), snapshot.model.topology());
            let (a, b) = (decoded.to_state().output, snapshot.model.to_state().output);
            assert!(a.kernel.iter().zip(b.kernel.iter()).all(|(x, y)| (x - y).abs() < 1e-12));
        }

        let store = SqliteStore::open_in_memory().unwrap();
        ModelRegistry::with_codec(&store, "models", Box::new(JsonCodec))
            .save(&snapshot)
            .unwrap();
        assert!(ModelRegistry::with_codec(&store, "models", Box::new(JsonCodec))
            .get_model(&Filter::all())
            .is_ok());
        assert!(matches!(
            ModelRegistry::new(&store, "models").get_model(&Filter::all()),
            Err(TrainingError::Serialization(_))
        ));
    }

    #[test]
    fn test_load_pipe() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"type": "lstm", "meta.asset": "VALE3"}}"#).unwrap();
        let filter = load_pipe(file.path()).unwrap();
        assert_eq!(filter.to_nested(), json!({"type": "lstm", "meta": {"asset": "VALE3"}}));

        let mut bad = NamedTempFile::new().unwrap();
        write!(bad, "[1, 2]").unwrap();
        assert!(matches!(load_pipe(bad.path()), Err(TrainingError::InvalidFilter(_))));
    }
}
