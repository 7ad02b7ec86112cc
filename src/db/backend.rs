// src/db/backend.rs

use crate::db::schema::Schema;
use crate::errors::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored record. The optional `"id"` key is its identity.
pub type Document = Map<String, Value>;

/// Free-form key/value data attached to a collection.
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Query {
    All,
    /// Case-insensitive match anywhere in the document.
    Text(String),
    Term {
        field: String,
        value: Value,
    },
    /// Inclusive bounds; numbers compare numerically, ISO-8601 strings
    /// lexically.
    Range {
        field: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A single document the backend refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub id: Option<String>,
    pub status: Option<u16>,
    pub reason: String,
}

/// Collection-level operations a storage client provides.
///
/// Writes are upserts: documents with an `"id"` replace-merge the stored
/// document with the same id, documents without one are inserted as new.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Creates the collection. Creating one that already exists is not an
    /// error.
    async fn create(&self, name: &str, schema: Option<&Schema>) -> Result<(), StoreError>;

    /// Returns whether anything was dropped.
    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError>;

    /// `None` when the collection does not exist.
    async fn read_meta(&self, name: &str) -> Result<Option<Metadata>, StoreError>;

    /// Replaces the stored metadata.
    async fn write_meta(&self, name: &str, meta: &Metadata) -> Result<(), StoreError>;

    async fn read_schema(&self, name: &str) -> Result<Option<Schema>, StoreError>;

    /// Writes one batch, reporting per-document failures instead of failing
    /// the whole batch.
    async fn write_batch(
        &self,
        name: &str,
        docs: &[Document],
    ) -> Result<Vec<DocumentFailure>, StoreError>;

    /// `IndexNotFound` when the collection does not exist.
    async fn search(&self, name: &str, query: &Query, size: usize)
        -> Result<Vec<Document>, StoreError>;

    /// Every non-internal collection name.
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Field paths may only contain identifier characters and dots.
pub(crate) fn valid_field_path(field: &str) -> bool {
    !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
