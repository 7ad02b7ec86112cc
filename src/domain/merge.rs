// src/domain/merge.rs

//! Reconciles two listing feeds into one record per address fingerprint.

use crate::domain::listing::Listing;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Which side wins when both feeds carry the same core field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precedence {
    /// The enrichment feed's values are kept; the base feed only fills gaps.
    #[default]
    Enrich,
    /// The base feed's values are kept; the enrichment feed only fills gaps.
    Base,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
    /// Prefix for the base feed's preserved fields (`redfin` → `redfinPrice`).
    pub base_prefix: String,
    pub precedence: Precedence,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            base_prefix: "redfin".to_string(),
            precedence: Precedence::Enrich,
        }
    }
}

/// Collapses duplicate fingerprints within one feed. The later record wins
/// but keeps the position of the first occurrence.
fn dedupe(records: Vec<Listing>) -> (Vec<Option<Listing>>, HashMap<String, usize>) {
    let mut slots: Vec<Option<Listing>> = Vec::with_capacity(records.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());
    for record in records {
        match index.get(&record.id) {
            Some(&i) => slots[i] = Some(record),
            None => {
                index.insert(record.id.clone(), slots.len());
                slots.push(Some(record));
            }
        }
    }
    (slots, index)
}

fn prefixed(prefix: &str, field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => format!("{prefix}{}{}", first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

/// The base record's fields that survive a merge under the base prefix.
fn provenance_fields(base: &Listing, prefix: &str) -> Vec<(String, Value)> {
    let mut fields = Vec::new();
    let mut keep = |name: &str, value: Option<Value>| {
        if let Some(value) = value {
            fields.push((prefixed(prefix, name), value));
        }
    };

    keep("url", base.url.clone().map(Value::from));
    keep("description", base.description.clone().map(Value::from));
    keep("address", base.address.clone().map(Value::from));
    keep("price", base.price.map(Value::from));
    keep("beds", base.beds.map(Value::from));
    keep("baths", base.baths.map(Value::from));
    keep("firstListed", base.first_listed.map(|d| Value::from(d.to_rfc3339())));
    keep("lastSeen", base.last_seen.map(|d| Value::from(d.to_rfc3339())));
    keep("firstSeen", base.first_seen.map(|d| Value::from(d.to_rfc3339())));
    fields
}

fn merge_pair(base: Listing, enrich: Listing, policy: &MergePolicy) -> Listing {
    let provenance = provenance_fields(&base, &policy.base_prefix);
    let (mut merged, other) = match policy.precedence {
        Precedence::Enrich => (enrich, base),
        Precedence::Base => (base, enrich),
    };
    merged.fill_gaps_from(&other);
    for (key, value) in provenance {
        merged.extra.insert(key, value);
    }
    merged.merged_records = true;
    merged
}

/// Joins `base` and `enrich` by fingerprint.
///
/// Matched pairs become one merged record flagged `mergedRecords`, with the
/// base record's identifying fields preserved under the policy's prefix.
/// Unmatched records from either side pass through unchanged. Every
/// fingerprint appears exactly once and the output is sorted by address.
pub fn merge(base: Vec<Listing>, enrich: Vec<Listing>, policy: &MergePolicy) -> Vec<Listing> {
    let (mut base_slots, base_index) = dedupe(base);
    let (enrich_slots, _) = dedupe(enrich);

    let mut merged: Vec<Listing> = Vec::with_capacity(base_slots.len() + enrich_slots.len());
    for record in enrich_slots.into_iter().flatten() {
        let matched = base_index
            .get(&record.id)
            .and_then(|&i| base_slots[i].take());
        match matched {
            Some(base_record) => merged.push(merge_pair(base_record, record, policy)),
            None => merged.push(record),
        }
    }
    merged.extend(base_slots.into_iter().flatten());

    merged.sort_by(|a, b| a.address.cmp(&b.address));
    merged
}
