// src/db/sqlite.rs

//! Embedded document backend on SQLite.
//!
//! Documents are JSON bodies keyed by (collection, id); a catalog table
//! carries each collection's inferred schema and metadata.

use crate::db::backend::{valid_field_path, Document, DocumentBackend, DocumentFailure, Metadata, Query};
use crate::db::connection::Connector;
use crate::db::schema::Schema;
use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    schema_json TEXT,
    meta_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
) WITHOUT ROWID;
"#;

/// Opens (or creates) the SQLite file. `None` opens a private in-memory
/// database.
#[derive(Debug, Clone, Default)]
pub struct SqliteConnector {
    path: Option<PathBuf>,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn in_memory() -> Self {
        Self { path: None }
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Client = SqliteClient;

    async fn connect(&self) -> Result<SqliteClient, StoreError> {
        let conn = match &self.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = ?self.path, "sqlite store opened");
        Ok(SqliteClient {
            conn: Mutex::new(conn),
        })
    }
}

pub struct SqliteClient {
    conn: Mutex<Connection>,
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Builds the WHERE clause for a query. Parameter `?1` is the collection.
fn where_clause(query: &Query) -> Result<(String, Vec<SqlValue>), StoreError> {
    let json_path = |field: &str| -> Result<SqlValue, StoreError> {
        if !valid_field_path(field) {
            return Err(StoreError::Backend(format!("invalid field path: {field}")));
        }
        Ok(SqlValue::Text(format!("$.{field}")))
    };

    let mut sql = String::from("collection = ?1");
    let mut params: Vec<SqlValue> = Vec::new();
    match query {
        Query::All => {}
        Query::Text(text) => {
            let escaped = text
                .to_lowercase()
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            params.push(SqlValue::Text(format!("%{escaped}%")));
            sql.push_str(" AND lower(body) LIKE ?2 ESCAPE '\\'");
        }
        Query::Term { field, value } => {
            params.push(json_path(field)?);
            params.push(to_sql(value));
            sql.push_str(" AND json_extract(body, ?2) = ?3");
        }
        Query::Range { field, gte, lte } => {
            params.push(json_path(field)?);
            if let Some(gte) = gte {
                params.push(to_sql(gte));
                sql.push_str(&format!(" AND json_extract(body, ?2) >= ?{}", params.len() + 1));
            }
            if let Some(lte) = lte {
                params.push(to_sql(lte));
                sql.push_str(&format!(" AND json_extract(body, ?2) <= ?{}", params.len() + 1));
            }
        }
    }
    Ok((sql, params))
}

fn document_id(doc: &Document) -> Option<String> {
    match doc.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

impl SqliteClient {
    fn exists_in(conn: &Connection, name: &str) -> Result<bool, StoreError> {
        let found = conn
            .query_row(
                "SELECT 1 FROM collections WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn upsert_one(
        tx: &Connection,
        name: &str,
        doc: &Document,
        now: &str,
    ) -> Result<(), StoreError> {
        let Some(id) = document_id(doc) else {
            let id = Uuid::new_v4().to_string();
            let mut body = doc.clone();
            body.insert("id".to_string(), Value::String(id.clone()));
            tx.execute(
                "INSERT INTO documents (collection, id, body, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, id, serde_json::to_string(&body)?, now],
            )?;
            return Ok(());
        };

        let existing: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![name, id],
                |row| row.get(0),
            )
            .optional()?;

        // Field-level merge: new values overwrite, untouched fields survive.
        let mut body = match existing {
            Some(text) => serde_json::from_str::<Document>(&text)?,
            None => Document::new(),
        };
        for (key, value) in doc {
            body.insert(key.clone(), value.clone());
        }
        body.insert("id".to_string(), Value::String(id.clone()));

        tx.execute(
            r#"
            INSERT INTO documents (collection, id, body, updated_at) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(collection, id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
            params![name, id, serde_json::to_string(&body)?, now],
        )?;
        Ok(())
    }
}

#[async_trait]
impl DocumentBackend for SqliteClient {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        Self::exists_in(&conn, name)
    }

    async fn create(&self, name: &str, schema: Option<&Schema>) -> Result<(), StoreError> {
        let schema_json = schema.map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO collections (name, schema_json, created_at) VALUES (?1, ?2, ?3)",
            params![name, schema_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM documents WHERE collection = ?1", params![name])?;
        let removed = tx.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    async fn read_meta(&self, name: &str) -> Result<Option<Metadata>, StoreError> {
        let conn = self.conn.lock();
        let text: Option<String> = conn
            .query_row(
                "SELECT meta_json FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        text.map(|t| serde_json::from_str(&t).map_err(StoreError::from))
            .transpose()
    }

    async fn write_meta(&self, name: &str, meta: &Metadata) -> Result<(), StoreError> {
        let text = serde_json::to_string(meta)?;
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE collections SET meta_json = ?2 WHERE name = ?1",
            params![name, text],
        )?;
        if updated == 0 {
            return Err(StoreError::IndexNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn read_schema(&self, name: &str) -> Result<Option<Schema>, StoreError> {
        let conn = self.conn.lock();
        let text: Option<Option<String>> = conn
            .query_row(
                "SELECT schema_json FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match text.flatten() {
            Some(t) => Ok(Some(serde_json::from_str(&t)?)),
            None => Ok(None),
        }
    }

    async fn write_batch(
        &self,
        name: &str,
        docs: &[Document],
    ) -> Result<Vec<DocumentFailure>, StoreError> {
        let mut conn = self.conn.lock();
        if !Self::exists_in(&conn, name)? {
            return Err(StoreError::IndexNotFound(name.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        let mut failures = Vec::new();
        for doc in docs {
            if let Err(e) = Self::upsert_one(&tx, name, doc, &now) {
                failures.push(DocumentFailure {
                    id: document_id(doc),
                    status: None,
                    reason: e.to_string(),
                });
            }
        }
        tx.commit()?;
        Ok(failures)
    }

    async fn search(
        &self,
        name: &str,
        query: &Query,
        size: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let (clause, mut extra) = where_clause(query)?;
        let conn = self.conn.lock();
        if !Self::exists_in(&conn, name)? {
            return Err(StoreError::IndexNotFound(name.to_string()));
        }

        let mut params = vec![SqlValue::Text(name.to_string())];
        params.append(&mut extra);
        let limit_param = params.len() + 1;
        params.push(SqlValue::Integer(size as i64));

        let sql = format!("SELECT body FROM documents WHERE {clause} ORDER BY id LIMIT ?{limit_param}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str::<Document>(&row?)?);
        }
        Ok(out)
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM collections WHERE name NOT LIKE '.%' ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}
