use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{new_doc_id, MemoryDocument, MemoryQuery, MemoryStore, Metadata};

/// Results returned by a free-text search
const TEXT_QUERY_LIMIT: i64 = 10;

/// Document memory on the shared SQLite database, searched through FTS5
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Quote every term so user text cannot inject FTS query syntax
fn fts_phrase(text: &str) -> String {
    text.split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn document_from_row(row: &SqliteRow) -> MemoryDocument {
    let metadata: String = row.get("metadata");
    MemoryDocument {
        id: row.get("id"),
        task_id: row.get("task_id"),
        content: row.get("content"),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn add(&self, task_id: &str, document: &str, metadata: Metadata) -> Result<String> {
        let id = new_doc_id();
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;

        sqlx::query(
            "INSERT INTO memory_documents (id, task_id, content, metadata, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(document)
        .bind(serde_json::Value::Object(metadata).to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to store memory document")?;

        tracing::debug!("Stored memory document {} for task {}", id, task_id);
        Ok(id)
    }

    async fn query(&self, task_id: &str, query: &MemoryQuery) -> Result<Vec<MemoryDocument>> {
        let rows = match query {
            MemoryQuery::Id(id) => sqlx::query(
                "SELECT id, task_id, content, metadata FROM memory_documents WHERE task_id = ? AND id = ?",
            )
            .bind(task_id)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query memory by id")?,

            MemoryQuery::Field { key, value } => sqlx::query(
                "SELECT id, task_id, content, metadata FROM memory_documents WHERE task_id = ? AND json_extract(metadata, '$.' || ?) = ? ORDER BY created_at DESC",
            )
            .bind(task_id)
            .bind(key)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query memory by field")?,

            MemoryQuery::Text(text) => {
                let phrase = fts_phrase(text);
                if phrase.is_empty() {
                    return Ok(Vec::new());
                }

                sqlx::query(
                    r#"
                    SELECT d.id, d.task_id, d.content, d.metadata
                    FROM memory_fts
                    JOIN memory_documents d ON d.id = memory_fts.doc_id
                    WHERE memory_fts MATCH ? AND memory_fts.task_id = ?
                    ORDER BY memory_fts.rank
                    LIMIT ?
                    "#,
                )
                .bind(phrase)
                .bind(task_id)
                .bind(TEXT_QUERY_LIMIT)
                .fetch_all(&self.pool)
                .await
                .context("Failed to execute FTS query on memory_fts")?
            }
        };

        Ok(rows.iter().map(document_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteMemoryStore) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        (temp_dir, SqliteMemoryStore::new(db.pool().clone()))
    }

    #[test]
    fn test_fts_phrase_quotes_terms() {
        assert_eq!(fts_phrase("sales \"q3\""), "\"sales\" OR \"\"\"q3\"\"\"");
        assert_eq!(fts_phrase("   "), "");
    }

    #[tokio::test]
    async fn test_sqlite_store_queries() {
        let (_tmp, store) = setup().await;
        let meta = json!({"filename": "notes.txt", "type": "file"});
        let id = store
            .add("t1", "the launch date is friday", meta.as_object().cloned().unwrap())
            .await
            .unwrap();
        store
            .add("t2", "launch codes are elsewhere", Metadata::new())
            .await
            .unwrap();

        let by_text = store
            .query("t1", &MemoryQuery::Text("launch".into()))
            .await
            .unwrap();
        assert_eq!(by_text.len(), 1);
        assert_eq!(by_text[0].id, id);

        let by_field = store
            .query("t1", &MemoryQuery::field("filename", "notes.txt"))
            .await
            .unwrap();
        assert_eq!(by_field[0].metadata["type"], "file");

        let by_id = store.query("t2", &MemoryQuery::Id(id)).await.unwrap();
        assert!(by_id.is_empty());
    }
}
