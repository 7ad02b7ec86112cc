// src/db/schema.rs

//! Field-type inference from sample records.
//!
//! Types form a small lattice: identical types join to themselves,
//! `integer ⊔ float = float`, objects join field by field, arrays join
//! their item types, and any other pairing widens to `text`.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type Schema = BTreeMap<String, FieldType>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    Date,
    Text,
    Object { fields: Schema },
    Array { items: Box<FieldType> },
}

/// Least upper bound of two field types.
pub fn join(a: FieldType, b: FieldType) -> FieldType {
    use FieldType::*;
    match (a, b) {
        (a, b) if a == b => a,
        (Integer, Float) | (Float, Integer) => Float,
        (Object { fields: mut left }, Object { fields: right }) => {
            merge_schema(&mut left, right);
            Object { fields: left }
        }
        (Array { items: left }, Array { items: right }) => Array {
            items: Box::new(join(*left, *right)),
        },
        _ => Text,
    }
}

/// Joins `other` into `schema` field by field.
pub fn merge_schema(schema: &mut Schema, other: Schema) {
    for (field, incoming) in other {
        let joined = match schema.remove(&field) {
            Some(existing) => join(existing, incoming),
            None => incoming,
        };
        schema.insert(field, joined);
    }
}

fn infer_value(value: &Value) -> Option<FieldType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(FieldType::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(FieldType::Integer),
        Value::Number(_) => Some(FieldType::Float),
        Value::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => Some(FieldType::Date),
        Value::String(_) => Some(FieldType::Text),
        Value::Object(map) => Some(FieldType::Object {
            fields: infer_record(map),
        }),
        Value::Array(items) => items
            .iter()
            .filter_map(infer_value)
            .reduce(join)
            .map(|items| FieldType::Array {
                items: Box::new(items),
            }),
    }
}

fn infer_record(record: &Map<String, Value>) -> Schema {
    record
        .iter()
        .filter_map(|(field, value)| infer_value(value).map(|t| (field.clone(), t)))
        .collect()
}

/// Infers one schema covering every sample record. Nulls and empty arrays
/// carry no type information and are skipped.
pub fn infer_schema(records: &[Map<String, Value>]) -> Schema {
    let mut schema = Schema::new();
    for record in records {
        merge_schema(&mut schema, infer_record(record));
    }
    schema
}
