// src/db/store.rs

//! Named document collections on top of a [`StorageConnection`].
//!
//! Every operation takes one connection guard for its whole duration, so a
//! multi-batch upsert keeps the store open until the last batch is written.

use crate::db::backend::{Document, DocumentBackend, DocumentFailure, Metadata, Query};
use crate::db::connection::{Connector, StorageConnection};
use crate::db::schema::{infer_schema, Schema};
use crate::errors::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Records per backend write.
    pub batch_size: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

/// Records to write plus optional metadata for their collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub records: Vec<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Metadata>,
}

impl Dataset {
    /// Serializes typed records. Each one must serialize to a JSON object.
    pub fn from_records<T: Serialize>(records: &[T]) -> Result<Self, StoreError> {
        let records = records
            .iter()
            .enumerate()
            .map(|(i, record)| match serde_json::to_value(record)? {
                Value::Object(doc) => Ok(doc),
                other => Err(StoreError::InvalidDataset(format!(
                    "record {i} is not an object: {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            records,
            meta: None,
        })
    }

    /// Accepts `{ "records": [...], "meta": {...}? }` from untyped input.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let Value::Object(mut body) = value else {
            return Err(StoreError::InvalidDataset("dataset must be an object".into()));
        };
        let records = match body.remove("records") {
            Some(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Object(doc) => Ok(doc),
                    other => Err(StoreError::InvalidDataset(format!(
                        "record {i} is not an object: {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(StoreError::InvalidDataset(format!(
                    "records must be a list, got {other}"
                )))
            }
            None => return Err(StoreError::InvalidDataset("records is missing".into())),
        };
        let meta = match body.remove("meta") {
            None | Some(Value::Null) => None,
            Some(Value::Object(meta)) => Some(meta),
            Some(other) => {
                return Err(StoreError::InvalidDataset(format!(
                    "meta must be an object, got {other}"
                )))
            }
        };
        Ok(Self { records, meta })
    }

    pub fn with_meta(mut self, meta: Metadata) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Normalizes ids to strings. Fails on ids that are neither string nor
    /// number, before anything is written.
    fn validate(&mut self) -> Result<(), StoreError> {
        for (i, record) in self.records.iter_mut().enumerate() {
            match record.get("id") {
                None | Some(Value::String(_)) => {}
                Some(Value::Null) => {
                    record.remove("id");
                }
                Some(Value::Number(n)) => {
                    let id = n.to_string();
                    record.insert("id".into(), Value::String(id));
                }
                Some(other) => {
                    return Err(StoreError::InvalidDataset(format!(
                        "record {i} has an unusable id: {other}"
                    )))
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertOptions {
    /// Infer a field schema from the records when creating the collection.
    pub infer_types: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self { infer_types: true }
    }
}

/// What went wrong in one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch: usize,
    /// Documents in this batch that were not written.
    pub failed: usize,
    pub errors: Vec<DocumentFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub written: usize,
    pub batches: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchResult {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.iter().map(|f| f.failed).sum()
    }

    /// Turns a partial write into a `PartialBatchFailure` for callers that
    /// need every record stored.
    pub fn into_result(self, index: &str) -> Result<Self, StoreError> {
        if self.is_partial() {
            return Err(StoreError::PartialBatchFailure {
                index: index.to_string(),
                failed: self.failed_count(),
                batches: self.failures.len(),
            });
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Collection {
    pub records: Vec<Document>,
    pub meta: Metadata,
}

pub struct DocumentStore<C: Connector> {
    conn: StorageConnection<C>,
    settings: StoreSettings,
}

impl<C: Connector> Clone for DocumentStore<C> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            settings: self.settings.clone(),
        }
    }
}

fn merge_meta(stored: &mut Metadata, incoming: Metadata) {
    for (key, value) in incoming {
        stored.insert(key, value);
    }
}

impl<C> DocumentStore<C>
where
    C: Connector,
    C::Client: DocumentBackend,
{
    pub fn new(conn: StorageConnection<C>, settings: StoreSettings) -> Self {
        Self { conn, settings }
    }

    pub fn connection(&self) -> &StorageConnection<C> {
        &self.conn
    }

    /// Creates the collection if it does not exist. With samples, the new
    /// collection gets a schema inferred from them.
    pub async fn create_index(
        &self,
        name: &str,
        samples: Option<&[Document]>,
    ) -> Result<(), StoreError> {
        let client = self.conn.acquire().await?;
        Self::ensure_index(&*client, name, samples).await
    }

    async fn ensure_index(
        client: &C::Client,
        name: &str,
        samples: Option<&[Document]>,
    ) -> Result<(), StoreError> {
        if client.exists(name).await? {
            return Ok(());
        }
        let schema = samples.filter(|s| !s.is_empty()).map(infer_schema);
        client.create(name, schema.as_ref()).await?;
        info!(index = name, fields = schema.as_ref().map(|s| s.len()).unwrap_or(0), "created index");
        Ok(())
    }

    pub async fn upsert(&self, name: &str, dataset: Dataset) -> Result<BatchResult, StoreError> {
        self.upsert_with(name, dataset, UpsertOptions::default()).await
    }

    /// Validates, creates the collection if needed, merges metadata, then
    /// writes records in sequential batches. A failing batch is recorded and
    /// the remaining batches are still written.
    pub async fn upsert_with(
        &self,
        name: &str,
        mut dataset: Dataset,
        options: UpsertOptions,
    ) -> Result<BatchResult, StoreError> {
        dataset.validate()?;

        let client = self.conn.acquire().await?;
        let batch_size = self.settings.batch_size.max(1);
        let samples_end = dataset.records.len().min(batch_size);
        let samples = options.infer_types.then(|| &dataset.records[..samples_end]);
        Self::ensure_index(&*client, name, samples).await?;

        if let Some(meta) = dataset.meta.take() {
            let mut stored = client.read_meta(name).await?.unwrap_or_default();
            merge_meta(&mut stored, meta);
            client.write_meta(name, &stored).await?;
        }

        let mut result = BatchResult::default();
        for (batch, chunk) in dataset.records.chunks(batch_size).enumerate() {
            result.batches += 1;
            match client.write_batch(name, chunk).await {
                Ok(errors) if errors.is_empty() => result.written += chunk.len(),
                Ok(errors) => {
                    result.written += chunk.len().saturating_sub(errors.len());
                    result.failures.push(BatchFailure {
                        batch,
                        failed: errors.len(),
                        errors,
                    });
                }
                Err(e) => {
                    warn!(index = name, batch, error = %e, "batch write failed");
                    result.failures.push(BatchFailure {
                        batch,
                        failed: chunk.len(),
                        errors: vec![DocumentFailure {
                            id: None,
                            status: None,
                            reason: e.to_string(),
                        }],
                    });
                }
            }
        }

        if result.is_partial() {
            warn!(
                index = name,
                written = result.written,
                failed = result.failed_count(),
                "upsert partially failed"
            );
        } else {
            debug!(index = name, written = result.written, batches = result.batches, "upsert complete");
        }
        Ok(result)
    }

    /// `IndexNotFound` when the collection does not exist.
    pub async fn get(
        &self,
        name: &str,
        query: &Query,
        size: usize,
    ) -> Result<Collection, StoreError> {
        let client = self.conn.acquire().await?;
        let records = client.search(name, query, size).await?;
        let meta = client.read_meta(name).await?.unwrap_or_default();
        Ok(Collection { records, meta })
    }

    /// Returns whether a collection was removed. Missing collections are not
    /// an error.
    pub async fn delete_index(&self, name: &str) -> Result<bool, StoreError> {
        let client = self.conn.acquire().await?;
        let removed = client.drop_collection(name).await?;
        if removed {
            info!(index = name, "deleted index");
        }
        Ok(removed)
    }

    /// Stored metadata, or an empty map if the collection is missing or the
    /// store cannot be reached.
    pub async fn metadata(&self, name: &str) -> Metadata {
        let read = async {
            let client = self.conn.acquire().await?;
            Ok::<_, StoreError>(client.read_meta(name).await?)
        };
        match read.await {
            Ok(meta) => meta.unwrap_or_default(),
            Err(e) => {
                warn!(index = name, error = %e, "metadata read failed");
                Metadata::new()
            }
        }
    }

    /// Merges `meta` into the stored metadata, creating the collection first
    /// if needed.
    pub async fn update_metadata(&self, name: &str, meta: Metadata) -> Result<(), StoreError> {
        let client = self.conn.acquire().await?;
        Self::ensure_index(&*client, name, None).await?;
        let mut stored = client.read_meta(name).await?.unwrap_or_default();
        merge_meta(&mut stored, meta);
        client.write_meta(name, &stored).await
    }

    pub async fn schema(&self, name: &str) -> Result<Option<Schema>, StoreError> {
        let client = self.conn.acquire().await?;
        client.read_schema(name).await
    }

    pub async fn list_indices(&self) -> Result<BTreeMap<String, Metadata>, StoreError> {
        let client = self.conn.acquire().await?;
        let mut indices = BTreeMap::new();
        for name in client.list().await? {
            let meta = client.read_meta(&name).await?.unwrap_or_default();
            indices.insert(name, meta);
        }
        Ok(indices)
    }

    /// Free-text search across several collections. Missing collections are
    /// skipped. Each hit carries the collection it came from under `_index`.
    pub async fn query(
        &self,
        names: &[&str],
        text: &str,
        size: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let client = self.conn.acquire().await?;
        let query = Query::Text(text.to_string());
        let mut hits = Vec::new();
        for name in names {
            if hits.len() >= size {
                break;
            }
            match client.search(name, &query, size - hits.len()).await {
                Ok(docs) => hits.extend(docs.into_iter().map(|mut doc| {
                    doc.insert("_index".into(), Value::String(name.to_string()));
                    doc
                })),
                Err(e) if e.is_not_found() => debug!(index = *name, "skipping missing index"),
                Err(e) => return Err(e),
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dataset_rejects_non_list_records() {
        let err = Dataset::from_value(json!({ "records": { "id": 1 } })).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDataset(_)));

        let err = Dataset::from_value(json!({ "records": [1, 2] })).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDataset(_)));
    }

    #[test]
    fn numeric_ids_become_strings() {
        let mut ds = Dataset::from_value(json!({ "records": [{ "id": 7 }, { "id": null }] })).unwrap();
        ds.validate().unwrap();
        assert_eq!(ds.records[0]["id"], json!("7"));
        assert!(!ds.records[1].contains_key("id"));

        let mut bad = Dataset::from_value(json!({ "records": [{ "id": [1] }] })).unwrap();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn partial_results_convert_to_errors() {
        let result = BatchResult {
            written: 5,
            batches: 2,
            failures: vec![BatchFailure {
                batch: 1,
                failed: 3,
                errors: vec![],
            }],
        };
        assert!(result.is_partial());
        match result.into_result("x") {
            Err(StoreError::PartialBatchFailure { failed, batches, .. }) => {
                assert_eq!((failed, batches), (3, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
