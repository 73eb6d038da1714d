// projeto: lstmdbtrain
// file: src/neural/mod.rs
// Module declarations for the LSTM training harness

pub mod utils;         // Error type, activations, losses and optimizers
pub mod config;        // TOML run configuration
pub mod db;            // Document store trait, filters and backend selection
pub mod sqlite_store;  // SQLite backend
pub mod pg_store;      // PostgreSQL backend
pub mod data;          // Batch source: paginated queries into tensors
pub mod model;         // Stacked LSTM and the model factory
pub mod storage;       // Model registry and codecs
pub mod metrics;       // Loss tracking and the predictions CSV
pub mod trainer;       // Training, evaluation and prediction loops
pub mod orchestrator;  // Mode-flag driven run
pub mod importer;      // Bulk document import

#[cfg(test)]
mod testutil;

pub use config::HarnessConfig;
pub use utils::TrainingError;
