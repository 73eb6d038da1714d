// projeto: lstmdbtrain
// file: src/neural/importer.rs
// Bulk loading of sample documents from JSON or JSON-lines files

use log::{debug, info};
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::neural::db::DocumentStore;
use crate::neural::utils::TrainingError;

fn parse_records(text: &str) -> Result<Vec<Value>, TrainingError> {
    let trimmed = text.trim_start();
    let records: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line)
                    .map_err(|e| TrainingError::MalformedDocument(format!("line {}: {}", idx + 1, e)))
            })
            .collect::<Result<_, _>>()?
    };

    if let Some((idx, record)) = records.iter().enumerate().find(|(_, r)| !r.is_object()) {
        return Err(TrainingError::MalformedDocument(format!(
            "record {} is not an object: {}",
            idx, record
        )));
    }
    Ok(records)
}

/// Inserts every record of `path` into `collection`, `chunk_size` at a time.
/// The whole file is parsed first, so a bad record aborts before any insert.
pub fn import_documents(
    store: &dyn DocumentStore,
    collection: &str,
    path: &Path,
    chunk_size: usize,
) -> Result<usize, TrainingError> {
    if chunk_size == 0 {
        return Err(TrainingError::Config("chunkSize must be greater than zero".to_string()));
    }
    info!("📥 [Importer] Reading {}", path.display());
    let records = parse_records(&fs::read_to_string(path)?)?;

    let mut inserted = 0;
    for chunk in records.chunks(chunk_size) {
        inserted += store.insert_many(collection, chunk)?;
        debug!("[Importer] {}/{} documents into '{}'", inserted, records.len(), collection);
    }

    info!("✅ [Importer] Imported {} documents into '{}'", inserted, collection);
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::db::Filter;
    use crate::neural::sqlite_store::SqliteStore;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_import_json_array_in_chunks() {
        let store = SqliteStore::open_in_memory().unwrap();
        let docs: Vec<String> = (0..7)
            .map(|i| format!(r#"{{"data": [[{}, 1.0]], "target": {}}}"#, i, i))
            .collect();
        let file = file_with(&format!("[{}]", docs.join(",")));

        assert_eq!(import_documents(&store, "train", file.path(), 3).unwrap(), 7);
        let stored = store.find("train", &Filter::all(), 0, 100).unwrap();
        assert_eq!(stored.len(), 7);
        assert_eq!(stored[6].body["target"], 6);
    }

    #[test]
    fn test_import_json_lines() {
        let store = SqliteStore::open_in_memory().unwrap();
        let file = file_with("{\"target\": 1}\n\n{\"target\": 2}\n");
        assert_eq!(import_documents(&store, "c", file.path(), 10).unwrap(), 2);
    }

    #[test]
    fn test_import_rejects_non_objects() {
        let store = SqliteStore::open_in_memory().unwrap();
        let file = file_with(r#"[{"target": 1}, 5]"#);
        assert!(matches!(
            import_documents(&store, "c", file.path(), 10),
            Err(TrainingError::MalformedDocument(_))
        ));
        assert!(store.find("c", &Filter::all(), 0, 10).unwrap().is_empty());

        let lines = file_with("{\"target\": 1}\nnot json\n");
        assert!(import_documents(&store, "c", lines.path(), 10).is_err());
        assert!(import_documents(&store, "c", lines.path(), 0).is_err());
    }
}
