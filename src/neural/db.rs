// projeto: lstmdbtrain
// file: src/neural/db.rs
// Document store abstraction shared by the batch source and the model registry

use chrono::{DateTime, Utc};
use log::info;
use serde_json::{Map, Value};

use crate::neural::pg_store::PostgresStore;
use crate::neural::sqlite_store::SqliteStore;
use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: i64,
    pub body: Value,
    pub blob: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// Equality query over document fields. Keys may be dotted paths into nested
/// objects; an empty filter matches every document of the collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: Map<String, Value>,
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn from_value(value: Value) -> Result<Self, TrainingError> {
        match value {
            Value::Object(fields) => {
                if let Some(key) = fields.keys().find(|k| k.is_empty() || k.split('.').any(str::is_empty)) {
                    return Err(TrainingError::InvalidFilter(format!("invalid field path '{}'", key)));
                }
                Ok(Filter { fields })
            }
            other => Err(TrainingError::InvalidFilter(format!(
                "filter must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Expands dotted keys into nested objects, e.g. `{"a.b": 1}` becomes
    /// `{"a": {"b": 1}}`.
    pub fn to_nested(&self) -> Value {
        let mut root = Map::new();
        for (key, value) in &self.fields {
            let mut segments: Vec<&str> = key.split('.').collect();
            let last = segments.pop().unwrap_or_default();
            let mut cursor = &mut root;
            for segment in segments {
                let entry = cursor
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                cursor = match entry {
                    Value::Object(map) => map,
                    _ => unreachable!("entry was just replaced by an object"),
                };
            }
            cursor.insert(last.to_string(), value.clone());
        }
        Value::Object(root)
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Value::Object(self.fields.clone()))
    }
}

/// Minimal database contract: paginated find in natural order, newest match
/// lookup and insertion. Methods take `&self` so one store can back the
/// batch source and the registry at the same time.
pub trait DocumentStore {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, TrainingError>;

    fn get_most_recent(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<StoredDocument>, TrainingError>;

    fn insert(&self, collection: &str, body: &Value, blob: Option<&[u8]>) -> Result<i64, TrainingError>;

    fn insert_many(&self, collection: &str, bodies: &[Value]) -> Result<usize, TrainingError> {
        for body in bodies {
            self.insert(collection, body, None)?;
        }
        Ok(bodies.len())
    }
}

/// Opens the backend named by the URL scheme: `postgres://` / `postgresql://`
/// for PostgreSQL, `sqlite://<path>` or `sqlite::memory:` for SQLite.
pub fn open_store(db_url: &str) -> Result<Box<dyn DocumentStore>, TrainingError> {
    if db_url.starts_with("postgres://") || db_url.starts_with("postgresql://") {
        info!("🔌 [Database] Connecting to PostgreSQL");
        let store = PostgresStore::connect(db_url)?;
        Ok(Box::new(store))
    } else if db_url == "sqlite::memory:" {
        info!("🔌 [Database] Opening in-memory SQLite database");
        Ok(Box::new(SqliteStore::open_in_memory()?))
    } else if let Some(path) = db_url.strip_prefix("sqlite://") {
        info!("🔌 [Database] Opening SQLite database at {}", path);
        Ok(Box::new(SqliteStore::open(path)?))
    } else {
        Err(TrainingError::Config(format!(
            "unsupported database url '{}', expected postgres:// or sqlite://",
            db_url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_requires_object() {
        assert!(Filter::from_value(json!({"type": "lstm"})).is_ok());
        assert!(matches!(
            Filter::from_value(json!(["type"])),
            Err(TrainingError::InvalidFilter(_))
        ));
        assert!(Filter::from_value(json!({"a..b": 1})).is_err());
    }

    #[test]
    fn test_filter_nesting() {
        let filter = Filter::all().with("meta.asset", "PETR4").with("type", "lstm");
        assert_eq!(
            filter.to_nested(),
            json!({"meta": {"asset": "PETR4"}, "type": "lstm"})
        );
    }

    #[test]
    fn test_open_store_rejects_unknown_scheme() {
        assert!(matches!(open_store("mongodb://localhost"), Err(TrainingError::Config(_))));
        assert!(open_store("sqlite::memory:").is_ok());
    }
}
