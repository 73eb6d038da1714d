// projeto: lstmdbtrain
// file: src/neural/pg_store.rs
// PostgreSQL backend for the document store (JSONB bodies, containment filters)

use chrono::{DateTime, Utc};
use log::{debug, info};
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};
use serde_json::Value;
use std::cell::RefCell;

use crate::neural::db::{DocumentStore, Filter, StoredDocument};
use crate::neural::utils::TrainingError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id BIGSERIAL PRIMARY KEY,
        collection VARCHAR(100) NOT NULL,
        body JSONB NOT NULL,
        blob BYTEA,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, id);
    CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(collection, created_at);
    CREATE INDEX IF NOT EXISTS idx_documents_body ON documents USING GIN (body);
";

/// The postgres client needs `&mut` for every call; the store hands out
/// `&self`, so the client sits behind a `RefCell` (single-threaded use only).
pub struct PostgresStore {
    client: RefCell<Client>,
}

impl PostgresStore {
    pub fn connect(db_url: &str) -> Result<Self, TrainingError> {
        let mut client = Client::connect(db_url, NoTls)?;
        client.batch_execute(SCHEMA)?;
        info!("✅ [Database] Connected, documents table ready");
        Ok(PostgresStore {
            client: RefCell::new(client),
        })
    }
}

fn row_to_document(row: &Row) -> StoredDocument {
    StoredDocument {
        id: row.get("id"),
        body: row.get("body"),
        blob: row.get("blob"),
        created_at: row.get::<_, DateTime<Utc>>("created_at"),
    }
}

/// A filter split into what `body @> $2` can answer and what it cannot.
/// Containment matches arrays and objects as subsets, so those keys get an
/// exact `=` test; `null` means "missing or null", so those keys get an
/// `IS NULL` test.
#[derive(Debug)]
struct FilterParts {
    contained: Value,
    exact: Vec<(Vec<String>, Value)>,
    nulls: Vec<String>,
}

impl FilterParts {
    fn new(filter: &Filter) -> Self {
        let mut contained = Filter::all();
        let mut exact = Vec::new();
        let mut nulls = Vec::new();
        for (key, value) in filter.fields() {
            match value {
                Value::Null => nulls.push(key.clone()),
                Value::Array(_) | Value::Object(_) => {
                    exact.push((key.split('.').map(str::to_string).collect(), value.clone()))
                }
                _ => contained = contained.with(key, value.clone()),
            }
        }
        FilterParts {
            contained: contained.to_nested(),
            exact,
            nulls,
        }
    }

    /// Conditions following `body @> $2`; exact-match parameters start at `$3`.
    fn clauses(&self) -> String {
        let exact: String = (0..self.exact.len())
            .map(|i| format!(" AND body #> ${} = ${}", 3 + 2 * i, 4 + 2 * i))
            .collect();
        exact + &null_clauses(&self.nulls)
    }

    fn params<'a>(&'a self, collection: &'a &'a str) -> Vec<&'a (dyn ToSql + Sync)> {
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![collection, &self.contained];
        for (path, value) in &self.exact {
            params.push(path);
            params.push(value);
        }
        params
    }
}

fn null_clauses(nulls: &[String]) -> String {
    nulls
        .iter()
        .map(|key| {
            let path = key.split('.').map(|s| s.replace('\'', "''")).collect::<Vec<_>>().join(",");
            format!(
                " AND ((body #> '{{{}}}') IS NULL OR body #> '{{{}}}' = 'null'::jsonb)",
                path, path
            )
        })
        .collect()
}

impl DocumentStore for PostgresStore {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, TrainingError> {
        let parts = FilterParts::new(filter);
        let (limit, skip) = (limit as i64, skip as i64);
        let mut params = parts.params(&collection);
        let query = format!(
            "SELECT id, body, blob, created_at FROM documents
             WHERE collection = $1 AND body @> $2{}
             ORDER BY id ASC LIMIT ${} OFFSET ${}",
            parts.clauses(),
            params.len() + 1,
            params.len() + 2
        );
        params.push(&limit);
        params.push(&skip);
        debug!("[PostgresStore] find in '{}' skip={} limit={} filter={}", collection, skip, limit, filter);
        let rows = self.client.borrow_mut().query(query.as_str(), &params)?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    fn get_most_recent(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<StoredDocument>, TrainingError> {
        let parts = FilterParts::new(filter);
        let query = format!(
            "SELECT id, body, blob, created_at FROM documents
             WHERE collection = $1 AND body @> $2{}
             ORDER BY created_at DESC, id DESC LIMIT 1",
            parts.clauses()
        );
        let row = self
            .client
            .borrow_mut()
            .query_opt(query.as_str(), &parts.params(&collection))?;
        Ok(row.as_ref().map(row_to_document))
    }

    fn insert(&self, collection: &str, body: &Value, blob: Option<&[u8]>) -> Result<i64, TrainingError> {
        let row = self.client.borrow_mut().query_one(
            "INSERT INTO documents (collection, body, blob, created_at)
             VALUES ($1, $2, $3, $4) RETURNING id",
            &[&collection, body, &blob, &Utc::now()],
        )?;
        Ok(row.get("id"))
    }

    fn insert_many(&self, collection: &str, bodies: &[Value]) -> Result<usize, TrainingError> {
        let mut client = self.client.borrow_mut();
        let mut transaction = client.transaction()?;
        let stmt = transaction.prepare(
            "INSERT INTO documents (collection, body, created_at) VALUES ($1, $2, $3)",
        )?;
        for body in bodies {
            transaction.execute(&stmt, &[&collection, body, &Utc::now()])?;
        }
        transaction.commit()?;
        Ok(bodies.len())
    }
}
