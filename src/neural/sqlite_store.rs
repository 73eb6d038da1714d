// projeto: lstmdbtrain
// file: src/neural/sqlite_store.rs
// SQLite backend for the document store (JSON bodies queried with json_extract)

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use serde_json::Value;
use std::path::Path;

use crate::neural::db::{DocumentStore, Filter, StoredDocument};
use crate::neural::utils::TrainingError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        body TEXT NOT NULL,
        blob BLOB,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, id);
    CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(collection, created_at);
";

pub struct SqliteStore {
    conn: Connection,
}

type RawRow = (i64, String, Option<Vec<u8>>, String);

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, TrainingError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, TrainingError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn })
    }

    /// Builds the WHERE clause for `filter` and the values to bind, starting
    /// after the collection parameter.
    fn where_clause(filter: &Filter) -> (String, Vec<SqlValue>) {
        let mut clause = String::from("collection = ?1");
        let mut values = Vec::new();

        for (key, expected) in filter.fields() {
            let path = format!("$.{}", key);
            values.push(SqlValue::Text(path));
            let path_idx = values.len() + 1;

            match expected {
                Value::Null => {
                    clause.push_str(&format!(" AND json_extract(body, ?{}) IS NULL", path_idx));
                }
                Value::Array(_) | Value::Object(_) => {
                    values.push(SqlValue::Text(expected.to_string()));
                    clause.push_str(&format!(
                        " AND json_extract(body, ?{}) = json(?{})",
                        path_idx,
                        values.len() + 1
                    ));
                }
                scalar => {
                    values.push(scalar_to_sql(scalar));
                    clause.push_str(&format!(
                        " AND json_extract(body, ?{}) = ?{}",
                        path_idx,
                        values.len() + 1
                    ));
                }
            }
        }

        (clause, values)
    }

    fn query_rows(&self, sql: &str, collection: &str, mut values: Vec<SqlValue>) -> Result<Vec<StoredDocument>, TrainingError> {
        values.insert(0, SqlValue::Text(collection.to_string()));
        let mut stmt = self.conn.prepare(sql)?;
        let raw: Vec<RawRow> = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        raw.into_iter().map(row_to_document).collect()
    }
}

fn scalar_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        _ => SqlValue::Null,
    }
}

fn row_to_document((id, body, blob, created_at): RawRow) -> Result<StoredDocument, TrainingError> {
    let body: Value = serde_json::from_str(&body)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| TrainingError::MalformedDocument(format!("document {} has bad created_at: {}", id, e)))?
        .with_timezone(&Utc);
    Ok(StoredDocument {
        id,
        body,
        blob,
        created_at,
    })
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl DocumentStore for SqliteStore {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, TrainingError> {
        let (clause, mut values) = Self::where_clause(filter);
        values.push(SqlValue::Integer(limit as i64));
        let limit_idx = values.len() + 1;
        values.push(SqlValue::Integer(skip as i64));
        let offset_idx = values.len() + 1;

        let sql = format!(
            "SELECT id, body, blob, created_at FROM documents WHERE {} ORDER BY id ASC LIMIT ?{} OFFSET ?{}",
            clause, limit_idx, offset_idx
        );
        debug!("[SqliteStore] find in '{}' skip={} limit={} filter={}", collection, skip, limit, filter);
        self.query_rows(&sql, collection, values)
    }

    fn get_most_recent(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<StoredDocument>, TrainingError> {
        let (clause, values) = Self::where_clause(filter);
        let sql = format!(
            "SELECT id, body, blob, created_at FROM documents WHERE {} ORDER BY created_at DESC, id DESC LIMIT 1",
            clause
        );
        Ok(self.query_rows(&sql, collection, values)?.into_iter().next())
    }

    fn insert(&self, collection: &str, body: &Value, blob: Option<&[u8]>) -> Result<i64, TrainingError> {
        let body = serde_json::to_string(body)?;
        self.conn.execute(
            "INSERT INTO documents (collection, body, blob, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, body, blob, timestamp_now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_many(&self, collection: &str, bodies: &[Value]) -> Result<usize, TrainingError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO documents (collection, body, blob, created_at) VALUES (?1, ?2, NULL, ?3)",
            )?;
            for body in bodies {
                stmt.execute(params![collection, serde_json::to_string(body)?, timestamp_now()])?;
            }
        }
        tx.commit()?;
        Ok(bodies.len())
    }
}
