// src/db/elastic.rs

//! Document backend over an Elasticsearch node's REST API.

use crate::db::backend::{valid_field_path, Document, DocumentBackend, DocumentFailure, Metadata, Query};
use crate::db::connection::Connector;
use crate::db::schema::{FieldType, Schema};
use crate::errors::StoreError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ElasticConnector {
    base_url: String,
    timeout: Duration,
}

impl ElasticConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl Connector for ElasticConnector {
    type Client = ElasticClient;

    async fn connect(&self) -> Result<ElasticClient, StoreError> {
        let http = Client::builder().timeout(self.timeout).build()?;
        let client = ElasticClient {
            http,
            base_url: self.base_url.clone(),
        };
        let resp = client.http.get(&client.base_url).send().await?;
        if !resp.status().is_success() {
            return Err(StoreError::Backend(format!(
                "node answered {} on connect",
                resp.status()
            )));
        }
        debug!(url = %client.base_url, "elasticsearch client connected");
        Ok(client)
    }
}

pub struct ElasticClient {
    http: Client,
    base_url: String,
}

// Bulk response shapes.
// {
//   "errors": true,
//   "items": [
//     { "update": { "_id": "...", "status": 400, "error": { "type": "...", "reason": "..." } } }
//   ]
// }

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

#[derive(Deserialize)]
struct BulkItem {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Document,
}

#[derive(Deserialize)]
struct CatIndex {
    index: String,
}

fn mapping_for(field: &FieldType) -> Value {
    match field {
        FieldType::Integer => json!({ "type": "long" }),
        FieldType::Float => json!({ "type": "double" }),
        FieldType::Boolean => json!({ "type": "boolean" }),
        FieldType::Date => json!({ "type": "date" }),
        FieldType::Text => json!({
            "type": "text",
            "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
        }),
        FieldType::Object { fields } => json!({ "properties": properties_for(fields) }),
        // Elasticsearch has no array type; any field holds many values.
        FieldType::Array { items } => mapping_for(items),
    }
}

fn properties_for(schema: &Schema) -> Map<String, Value> {
    schema
        .iter()
        .map(|(name, field)| (name.clone(), mapping_for(field)))
        .collect()
}

fn field_from_mapping(mapping: &Value) -> FieldType {
    if let Some(props) = mapping.get("properties").and_then(Value::as_object) {
        return FieldType::Object {
            fields: schema_from_properties(props),
        };
    }
    match mapping.get("type").and_then(Value::as_str) {
        Some("long" | "integer" | "short" | "byte") => FieldType::Integer,
        Some("double" | "float" | "half_float" | "scaled_float") => FieldType::Float,
        Some("boolean") => FieldType::Boolean,
        Some("date") => FieldType::Date,
        _ => FieldType::Text,
    }
}

fn schema_from_properties(props: &Map<String, Value>) -> Schema {
    props
        .iter()
        .map(|(name, mapping)| (name.clone(), field_from_mapping(mapping)))
        .collect()
}

fn query_dsl(query: &Query) -> Result<Value, StoreError> {
    let check = |field: &str| {
        if valid_field_path(field) {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("invalid field path: {field}")))
        }
    };
    Ok(match query {
        Query::All => json!({ "match_all": {} }),
        Query::Text(text) => json!({ "simple_query_string": { "query": text } }),
        Query::Term { field, value } if field == "id" => {
            let id = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            json!({ "ids": { "values": [id] } })
        }
        Query::Term { field, value } => {
            check(field)?;
            // Text fields are analyzed; exact matches go through the keyword sub-field.
            let target = if value.is_string() {
                format!("{field}.keyword")
            } else {
                field.clone()
            };
            json!({ "term": { target: value } })
        }
        Query::Range { field, gte, lte } => {
            check(field)?;
            let mut bounds = Map::new();
            if let Some(gte) = gte {
                bounds.insert("gte".into(), gte.clone());
            }
            if let Some(lte) = lte {
                bounds.insert("lte".into(), lte.clone());
            }
            json!({ "range": { field.clone(): bounds } })
        }
    })
}

fn bulk_body(docs: &[Document]) -> Result<String, StoreError> {
    let mut body = String::new();
    for doc in docs {
        let id = match doc.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        match id {
            Some(id) => {
                body.push_str(&serde_json::to_string(&json!({ "update": { "_id": id } }))?);
                body.push('\n');
                body.push_str(&serde_json::to_string(&json!({ "doc": doc, "doc_as_upsert": true }))?);
            }
            None => {
                body.push_str(r#"{"index":{}}"#);
                body.push('\n');
                body.push_str(&serde_json::to_string(doc)?);
            }
        }
        body.push('\n');
    }
    Ok(body)
}

fn bulk_failures(resp: BulkResponse) -> Vec<DocumentFailure> {
    if !resp.errors {
        return Vec::new();
    }
    resp.items
        .into_iter()
        .filter_map(|mut item| {
            let (_, inner) = item.iter_mut().next()?;
            let item: BulkItem = serde_json::from_value(inner.take()).ok()?;
            let error = item.error?;
            Some(DocumentFailure {
                id: item.id,
                status: Some(item.status),
                reason: error
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            })
        })
        .collect()
}

impl ElasticClient {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn check(resp: Response, index: &str) -> Result<Response, StoreError> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::IndexNotFound(index.to_string()));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("{status}: {text}")));
        }
        Ok(resp)
    }

    async fn mapping(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let resp = self.http.get(self.url(&format!("{name}/_mapping"))).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = Self::check(resp, name).await?.json().await?;
        Ok(body.get(name).and_then(|i| i.get("mappings")).cloned())
    }
}

#[async_trait]
impl DocumentBackend for ElasticClient {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let resp = self.http.head(self.url(name)).send().await?;
        Ok(resp.status().is_success())
    }

    async fn create(&self, name: &str, schema: Option<&Schema>) -> Result<(), StoreError> {
        let mut mappings = json!({ "_meta": {} });
        if let Some(schema) = schema {
            mappings["properties"] = Value::Object(properties_for(schema));
        }
        let resp = self
            .http
            .put(self.url(name))
            .json(&json!({ "mappings": mappings }))
            .send()
            .await?;

        if resp.status() == StatusCode::BAD_REQUEST {
            let body: Value = resp.json().await.unwrap_or_default();
            let kind = body["error"]["type"].as_str().unwrap_or_default();
            if kind == "resource_already_exists_exception" {
                return Ok(());
            }
            return Err(StoreError::Backend(format!("create {name}: {body}")));
        }
        Self::check(resp, name).await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError> {
        let resp = self.http.delete(self.url(name)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(resp, name).await?;
        Ok(true)
    }

    async fn read_meta(&self, name: &str) -> Result<Option<Metadata>, StoreError> {
        let Some(mappings) = self.mapping(name).await? else {
            return Ok(None);
        };
        Ok(Some(
            mappings
                .get("_meta")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn write_meta(&self, name: &str, meta: &Metadata) -> Result<(), StoreError> {
        let resp = self
            .http
            .put(self.url(&format!("{name}/_mapping")))
            .json(&json!({ "_meta": meta }))
            .send()
            .await?;
        Self::check(resp, name).await?;
        Ok(())
    }

    async fn read_schema(&self, name: &str) -> Result<Option<Schema>, StoreError> {
        let Some(mappings) = self.mapping(name).await? else {
            return Ok(None);
        };
        Ok(mappings
            .get("properties")
            .and_then(Value::as_object)
            .map(schema_from_properties))
    }

    async fn write_batch(
        &self,
        name: &str,
        docs: &[Document],
    ) -> Result<Vec<DocumentFailure>, StoreError> {
        if !self.exists(name).await? {
            return Err(StoreError::IndexNotFound(name.to_string()));
        }
        let resp = self
            .http
            .post(self.url(&format!("{name}/_bulk?refresh=true")))
            .header("Content-Type", "application/x-ndjson")
            .body(bulk_body(docs)?)
            .send()
            .await?;
        let resp: BulkResponse = Self::check(resp, name).await?.json().await?;
        let failures = bulk_failures(resp);
        if !failures.is_empty() {
            warn!(index = name, failed = failures.len(), "bulk write had item errors");
        }
        Ok(failures)
    }

    async fn search(
        &self,
        name: &str,
        query: &Query,
        size: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let body = json!({
            "query": query_dsl(query)?,
            "size": size,
            "sort": ["_doc"],
        });
        let resp = self
            .http
            .post(self.url(&format!("{name}/_search")))
            .json(&body)
            .send()
            .await?;
        let resp: SearchResponse = Self::check(resp, name).await?.json().await?;
        Ok(resp
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                let mut doc = hit.source;
                doc.entry("id").or_insert(Value::String(hit.id));
                doc
            })
            .collect())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let resp = self
            .http
            .get(self.url("_cat/indices?format=json"))
            .send()
            .await?;
        let indices: Vec<CatIndex> = Self::check(resp, "_cat").await?.json().await?;
        let mut names: Vec<String> = indices
            .into_iter()
            .map(|i| i.index)
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }
}
