// src/pipeline/indexes.rs
use crate::scraper::{Feed, FeedKind, Source};

/// Global collection of per-region configuration.
pub const REGISTERED_INDEXES: &str = "registered_indexes";

fn snake_case(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// Collection names for one region's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNames {
    pub combined_rentals: String,
    pub combined_properties: String,
    pub zillow_rentals: String,
    pub zillow_properties: String,
    pub redfin_rentals: String,
    pub redfin_properties: String,
    pub rental_report: String,
}

impl IndexNames {
    pub fn for_region(region: &str) -> Self {
        let rentals = FeedKind::Rentals.as_str();
        let properties = FeedKind::Properties.as_str();
        Self {
            combined_rentals: snake_case(&[region, rentals]),
            combined_properties: snake_case(&[region, properties]),
            zillow_rentals: snake_case(&[region, rentals, Source::Zillow.as_str()]),
            zillow_properties: snake_case(&[region, properties, Source::Zillow.as_str()]),
            redfin_rentals: snake_case(&[region, rentals, Source::Redfin.as_str()]),
            redfin_properties: snake_case(&[region, properties, Source::Redfin.as_str()]),
            rental_report: snake_case(&[region, rentals, "report"]),
        }
    }

    /// Where a feed's raw listings are kept.
    pub fn raw(&self, feed: Feed) -> &str {
        match (feed.source, feed.kind) {
            (Source::Redfin, FeedKind::Rentals) => &self.redfin_rentals,
            (Source::Redfin, FeedKind::Properties) => &self.redfin_properties,
            (Source::Zillow, FeedKind::Rentals) => &self.zillow_rentals,
            (Source::Zillow, FeedKind::Properties) => &self.zillow_properties,
        }
    }

    pub fn all(&self) -> Vec<String> {
        vec![
            self.combined_rentals.clone(),
            self.combined_properties.clone(),
            self.zillow_rentals.clone(),
            self.zillow_properties.clone(),
            self.redfin_rentals.clone(),
            self.redfin_properties.clone(),
            self.rental_report.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_region_kind_source() {
        let names = IndexNames::for_region("austin");
        assert_eq!(names.combined_rentals, "austin_rentals");
        assert_eq!(names.combined_properties, "austin_properties");
        assert_eq!(names.zillow_rentals, "austin_rentals_zillow");
        assert_eq!(names.redfin_properties, "austin_properties_redfin");
        assert_eq!(names.rental_report, "austin_rentals_report");
        assert_eq!(names.raw(Feed::ZILLOW_PROPERTIES), "austin_properties_zillow");
        assert_eq!(names.all().len(), 7);
    }
}
