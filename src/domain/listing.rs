// src/domain/listing.rs

use crate::domain::normalize::{fingerprint, normalize_address};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLong {
    pub lat: f64,
    pub lon: f64,
}

/// A rental or for-sale listing, identified by the fingerprint of its
/// normalized street address rather than by any source-assigned ID, so the
/// same physical unit reported by two feeds collapses onto one record.
///
/// Fields the pipeline does not interpret live in `extra`. Raw upstream
/// payloads are kept verbatim under their source name (`extra["zillow"]`),
/// and merge provenance lands as prefixed keys (`extra["redfinPrice"]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// Address fingerprint; doubles as the document id in the store.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baths: Option<f64>,
    /// Living area in square feet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    /// Asking price, or monthly rent for rentals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    /// Monthly HOA dues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hoa: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_long: Option<LatLong>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_listed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub merged_records: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Listing {
    /// Starts a listing from its raw street address, deriving the
    /// normalized form and the fingerprint.
    pub fn from_address(address: impl Into<String>) -> Self {
        let address = address.into();
        let normalized = normalize_address(&address);
        Self {
            id: fingerprint(&normalized),
            address: Some(address),
            normalized_address: Some(normalized),
            ..Default::default()
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.id
    }

    /// Fills every core field that is missing here from `other`, and copies
    /// any extra keys this listing does not carry. Present values are never
    /// overwritten.
    pub fn fill_gaps_from(&mut self, other: &Listing) {
        macro_rules! fill {
            ($($field:ident),* $(,)?) => {
                $(
                    if self.$field.is_none() {
                        self.$field = other.$field.clone();
                    }
                )*
            };
        }

        fill!(
            address,
            normalized_address,
            source,
            beds,
            baths,
            area,
            price,
            hoa,
            lat_long,
            url,
            description,
            first_listed,
            first_seen,
            last_seen,
        );

        for (key, value) in &other.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Monthly rent as a float, if the listing carries a usable price.
    pub fn rent(&self) -> Option<f64> {
        self.price.map(|p| p as f64).filter(|p| p.is_finite() && *p > 0.0)
    }
}
