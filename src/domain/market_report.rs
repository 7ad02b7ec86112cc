// src/domain/market_report.rs

//! Rent statistics grouped by bedroom count.

use crate::domain::listing::Listing;
use crate::domain::normalize::{decimals, median, percentile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Buckets with fewer samples than this are left out of the report.
pub const MIN_BUCKET_SAMPLES: usize = 5;

/// A report bucket: one bedroom count, or every listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Bucket {
    Total,
    Beds(u32),
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Total => write!(f, "total"),
            Bucket::Beds(n) => write!(f, "{n}"),
        }
    }
}

impl From<Bucket> for String {
    fn from(bucket: Bucket) -> Self {
        bucket.to_string()
    }
}

impl TryFrom<String> for Bucket {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "total" {
            return Ok(Bucket::Total);
        }
        value
            .parse::<u32>()
            .map(Bucket::Beds)
            .map_err(|_| format!("invalid bucket key: {value}"))
    }
}

impl Bucket {
    fn kind(&self) -> String {
        match self {
            Bucket::Total => "total".to_string(),
            Bucket::Beds(0) => "studio".to_string(),
            Bucket::Beds(n) => format!("{n}-bedroom"),
        }
    }

    fn description(&self) -> String {
        match self {
            Bucket::Total => {
                "All properties over the given timespan, regardless of bedroom count".to_string()
            }
            Bucket::Beds(0) => "Studio properties".to_string(),
            Bucket::Beds(n) => format!("{n} bedroom properties"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    #[serde(rename = "25th")]
    pub p25: f64,
    #[serde(rename = "50th")]
    pub p50: f64,
    #[serde(rename = "90th")]
    pub p90: f64,
}

impl Percentiles {
    fn of(values: &[f64]) -> Self {
        Self {
            p25: decimals(percentile(values, 25.0, true), 2),
            p50: decimals(percentile(values, 50.0, true), 2),
            p90: decimals(percentile(values, 90.0, true), 2),
        }
    }
}

/// Rent figures for one bucket. Per-area figures are absent when no
/// listing in the bucket reports a usable area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistic {
    pub beds: Bucket,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub count: usize,
    pub avg_rent: f64,
    pub median_rent: f64,
    pub avg_rent_per_sqft: Option<f64>,
    pub median_rent_per_sqft: Option<f64>,
    pub rent_percentiles: Percentiles,
    pub rent_per_sqft_percentiles: Option<Percentiles>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketReport {
    /// Ordered by descending sample count.
    pub records: Vec<Statistic>,
}

impl MarketReport {
    pub fn bucket(&self, bucket: Bucket) -> Option<&Statistic> {
        self.records.iter().find(|s| s.beds == bucket)
    }

    pub fn beds(&self, beds: u32) -> Option<&Statistic> {
        self.bucket(Bucket::Beds(beds))
    }

    pub fn total(&self) -> Option<&Statistic> {
        self.bucket(Bucket::Total)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
struct Samples {
    rents: Vec<f64>,
    per_sqft: Vec<f64>,
}

impl Samples {
    fn push(&mut self, rent: f64, area: Option<f64>) {
        self.rents.push(rent);
        if let Some(per_sqft) = area.map(|a| rent / a).filter(|v| v.is_finite()) {
            self.per_sqft.push(per_sqft);
        }
    }

    /// Every field is derived here in one pass, after all samples are in.
    /// Inputs are sorted first so sums do not depend on listing order.
    fn finish(mut self, bucket: Bucket) -> Statistic {
        self.rents.sort_by(f64::total_cmp);
        self.per_sqft.sort_by(f64::total_cmp);

        let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
        let has_area = !self.per_sqft.is_empty();

        Statistic {
            beds: bucket,
            kind: bucket.kind(),
            description: bucket.description(),
            count: self.rents.len(),
            avg_rent: decimals(mean(&self.rents), 2),
            median_rent: decimals(median(&self.rents), 2),
            avg_rent_per_sqft: has_area.then(|| decimals(mean(&self.per_sqft), 2)),
            median_rent_per_sqft: has_area.then(|| decimals(median(&self.per_sqft), 2)),
            rent_percentiles: Percentiles::of(&self.rents),
            rent_per_sqft_percentiles: has_area.then(|| Percentiles::of(&self.per_sqft)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketStatisticsEngine {
    min_samples: usize,
}

impl Default for MarketStatisticsEngine {
    fn default() -> Self {
        Self {
            min_samples: MIN_BUCKET_SAMPLES,
        }
    }
}

impl MarketStatisticsEngine {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(1),
        }
    }

    /// Groups rentals by bedroom count (plus the synthetic `total` bucket)
    /// and computes rent statistics for every bucket with enough samples.
    ///
    /// Listings without a positive rent are not samples. Listings without a
    /// bedroom count only feed `total`.
    pub fn analyze(&self, listings: &[Listing]) -> MarketReport {
        let mut buckets: BTreeMap<Bucket, Samples> = BTreeMap::new();

        for listing in listings {
            let Some(rent) = listing.rent() else {
                continue;
            };
            buckets
                .entry(Bucket::Total)
                .or_default()
                .push(rent, listing.area);
            if let Some(beds) = listing.beds {
                buckets
                    .entry(Bucket::Beds(beds))
                    .or_default()
                    .push(rent, listing.area);
            }
        }

        let mut records: Vec<Statistic> = buckets
            .into_iter()
            .filter(|(_, samples)| samples.rents.len() >= self.min_samples)
            .map(|(bucket, samples)| samples.finish(bucket))
            .collect();

        // BTreeMap order (total first, then beds ascending) breaks ties.
        records.sort_by(|a, b| b.count.cmp(&a.count));
        MarketReport { records }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rental(id: usize, beds: Option<u32>, price: i64, area: Option<f64>) -> Listing {
        Listing {
            id: format!("r{id}"),
            beds,
            price: Some(price),
            area,
            ..Default::default()
        }
    }

    fn sample_rentals() -> Vec<Listing> {
        let mut out = Vec::new();
        for i in 0..6 {
            out.push(rental(i, Some(2), 2000 + i as i64 * 100, Some(1000.0)));
        }
        for i in 6..11 {
            out.push(rental(i, Some(1), 1400 + i as i64 * 10, Some(700.0)));
        }
        for i in 11..14 {
            out.push(rental(i, Some(3), 3000, Some(1500.0)));
        }
        out.push(rental(14, None, 1800, None));
        out
    }

    #[test]
    fn drops_small_buckets_and_orders_by_count() {
        let report = MarketStatisticsEngine::default().analyze(&sample_rentals());
        let keys: Vec<_> = report.records.iter().map(|s| s.beds).collect();
        assert_eq!(keys, vec![Bucket::Total, Bucket::Beds(2), Bucket::Beds(1)]);
        assert!(report.records.iter().all(|s| s.count >= MIN_BUCKET_SAMPLES));
        assert!(report.beds(3).is_none());
    }

    #[test]
    fn total_counts_every_priced_listing() {
        let mut listings = sample_rentals();
        listings.push(Listing {
            id: "unpriced".into(),
            beds: Some(2),
            ..Default::default()
        });
        let report = MarketStatisticsEngine::default().analyze(&listings);
        assert_eq!(report.total().unwrap().count, 15);
    }

    #[test]
    fn computes_bucket_figures() {
        let report = MarketStatisticsEngine::default().analyze(&sample_rentals());
        let two = report.beds(2).unwrap();
        assert_eq!(two.count, 6);
        assert_eq!(two.kind, "2-bedroom");
        assert_eq!(two.avg_rent, 2250.0);
        assert_eq!(two.median_rent, 2250.0);
        assert_eq!(two.avg_rent_per_sqft, Some(2.25));
        assert_eq!(two.rent_percentiles.p50, 2250.0);
        assert!(two.rent_percentiles.p25 <= two.rent_percentiles.p50);
        assert!(two.rent_percentiles.p50 <= two.rent_percentiles.p90);
    }

    #[test]
    fn per_sqft_absent_without_area() {
        let listings: Vec<_> = (0..5).map(|i| rental(i, Some(0), 1000, None)).collect();
        let report = MarketStatisticsEngine::default().analyze(&listings);
        let studio = report.beds(0).unwrap();
        assert_eq!(studio.kind, "studio");
        assert_eq!(studio.avg_rent_per_sqft, None);
        assert_eq!(studio.rent_per_sqft_percentiles, None);
    }

    #[test]
    fn input_order_does_not_matter() {
        let listings = sample_rentals();
        let mut reversed = listings.clone();
        reversed.reverse();
        let engine = MarketStatisticsEngine::default();
        assert_eq!(engine.analyze(&listings), engine.analyze(&reversed));
    }

    #[test]
    fn bucket_keys_serialize_as_strings() {
        let report = MarketStatisticsEngine::default().analyze(&sample_rentals());
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["records"][0]["beds"], json!("total"));
        assert_eq!(value["records"][1]["beds"], json!("2"));
        assert_eq!(value["records"][1]["rentPercentiles"]["50th"], json!(2250.0));

        let back: MarketReport = serde_json::from_value(value).unwrap();
        assert_eq!(back, report);
    }
}
