// src/pipeline/region_config.rs

//! What a region scrapes, as registered in `registered_indexes`.

use crate::scraper::{Feed, FeedConfig, FeedKind, Source};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

/// Rental and for-sale feeds of one source. A missing for-sale config is
/// derived from the rental one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFeeds {
    pub rentals: FeedConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<FeedConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfig {
    pub region: String,
    pub zillow: SourceFeeds,
    pub redfin: SourceFeeds,
    #[serde(default)]
    pub related_indexes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ran: Option<DateTime<Utc>>,
}

impl RegionConfig {
    pub fn new(region: impl Into<String>, zillow_rentals: FeedConfig, redfin_rentals: FeedConfig) -> Self {
        Self {
            region: region.into(),
            zillow: SourceFeeds {
                rentals: zillow_rentals,
                properties: None,
            },
            redfin: SourceFeeds {
                rentals: redfin_rentals,
                properties: None,
            },
            related_indexes: Vec::new(),
            id: None,
            last_ran: None,
        }
    }

    fn feeds(&self, source: Source) -> &SourceFeeds {
        match source {
            Source::Redfin => &self.redfin,
            Source::Zillow => &self.zillow,
        }
    }

    /// The request config for a feed, deriving for-sale configs when none
    /// was registered.
    pub fn feed(&self, feed: Feed) -> FeedConfig {
        let feeds = self.feeds(feed.source);
        match feed.kind {
            FeedKind::Rentals => feeds.rentals.clone(),
            FeedKind::Properties => feeds
                .properties
                .clone()
                .unwrap_or_else(|| derive_properties(feed.source, &feeds.rentals)),
        }
    }

    /// Fills in derived for-sale configs so they are stored explicitly.
    pub fn with_derived_properties(mut self) -> Self {
        if self.zillow.properties.is_none() {
            self.zillow.properties = Some(derive_zillow_properties(&self.zillow.rentals));
        }
        if self.redfin.properties.is_none() {
            self.redfin.properties = Some(derive_redfin_properties(&self.redfin.rentals));
        }
        self
    }

    /// The region name prefixes collection names, so it is limited to
    /// lowercase letters, digits, `_` and `-`, and may not start with `_` or
    /// `-`. Every feed config must carry an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), String> {
        validate_region_name(&self.region)?;
        for feed in [
            Feed::REDFIN_RENTALS,
            Feed::ZILLOW_RENTALS,
            Feed::REDFIN_PROPERTIES,
            Feed::ZILLOW_PROPERTIES,
        ] {
            let config = self.feed(feed);
            let url = Url::parse(&config.url).map_err(|e| format!("{feed} url: {e}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(format!("{feed} url must be http(s)"));
            }
        }
        Ok(())
    }
}

fn validate_region_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("region name is empty".into());
    }
    if name.starts_with(['_', '-']) {
        return Err(format!("region name {name:?} may not start with '_' or '-'"));
    }
    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-';
    if !name.chars().all(allowed) {
        return Err(format!(
            "region name {name:?} may only hold lowercase letters, digits, '_' and '-'"
        ));
    }
    Ok(())
}

pub fn derive_properties(source: Source, rentals: &FeedConfig) -> FeedConfig {
    match source {
        Source::Redfin => derive_redfin_properties(rentals),
        Source::Zillow => derive_zillow_properties(rentals),
    }
}

/// Switches a Zillow rental search to the same area's homes for sale.
pub fn derive_zillow_properties(rentals: &FeedConfig) -> FeedConfig {
    let mut config = rentals.clone();
    config.url = rentals.url.replace("for_rent", "for_sale");

    if let Some(Value::Object(payload)) = config.payload.as_mut() {
        if let Some(Value::Object(state)) = payload.get_mut("searchQueryState") {
            state.insert(
                "filterState".into(),
                json!({
                    "sortSelection": { "value": "globalrelevanceex" },
                    "isAllHomes": { "value": true }
                }),
            );
        }
        let wants = payload
            .entry("wants")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(wants) = wants {
            wants.insert("cat2".into(), json!(["total"]));
        }
    }
    config
}

const REDFIN_RENTAL_ONLY_PARAMS: [&str; 4] = ["includeKeyFacts", "isRentals", "use_max_pins", "user_poly"];

/// Points a Redfin rental search at the for-sale search of the same area.
pub fn derive_redfin_properties(rentals: &FeedConfig) -> FeedConfig {
    let mut config = rentals.clone();
    let switched = rentals.url.replace("v1/search/rentals", "gis");

    config.url = match Url::parse(&switched) {
        Ok(mut url) => {
            let pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| !REDFIN_RENTAL_ONLY_PARAMS.contains(&k.as_ref()))
                .filter(|(k, _)| !matches!(k.as_ref(), "ord" | "include_nearby_homes"))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(pairs)
                .append_pair("include_nearby_homes", "true")
                .append_pair("ord", "redfin-recommended-asc");
            url.to_string()
        }
        Err(_) => switched,
    };
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zillow_rentals() -> FeedConfig {
        let mut config = FeedConfig::new("https://www.zillow.com/homes/for_rent/?searchQueryState=x");
        config.payload = Some(json!({
            "searchQueryState": {
                "mapBounds": { "north": 30.3, "south": 30.2, "east": -97.7, "west": -97.8 },
                "filterState": { "isForRent": { "value": true } }
            },
            "wants": { "cat1": ["mapResults"] }
        }));
        config
    }

    #[test]
    fn zillow_properties_switch_filters() {
        let derived = derive_zillow_properties(&zillow_rentals());
        assert_eq!(derived.url, "https://www.zillow.com/homes/for_sale/?searchQueryState=x");
        let payload = derived.payload.unwrap();
        assert_eq!(
            payload["searchQueryState"]["filterState"]["isAllHomes"]["value"],
            json!(true)
        );
        assert!(payload["searchQueryState"]["filterState"].get("isForRent").is_none());
        assert_eq!(payload["searchQueryState"]["mapBounds"]["north"], json!(30.3));
        assert_eq!(payload["wants"]["cat2"], json!(["total"]));
        assert_eq!(payload["wants"]["cat1"], json!(["mapResults"]));
    }

    #[test]
    fn redfin_properties_use_gis_search() {
        let rentals = FeedConfig::new(
            "https://www.redfin.com/stingray/api/v1/search/rentals?al=1&includeKeyFacts=true&isRentals=true&market=austin&poly=-97.7%2030.2&status=9",
        );
        let derived = derive_redfin_properties(&rentals);
        let url = Url::parse(&derived.url).unwrap();
        assert_eq!(url.path(), "/stingray/api/gis");
        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(params.contains(&("market".into(), "austin".into())));
        assert!(params.contains(&("poly".into(), "-97.7 30.2".into())));
        assert!(params.contains(&("include_nearby_homes".into(), "true".into())));
        assert!(!params.iter().any(|(k, _)| k == "isRentals"));
    }

    #[test]
    fn registered_properties_are_not_overridden() {
        let mut config = RegionConfig::new(
            "austin",
            zillow_rentals(),
            FeedConfig::new("https://www.redfin.com/stingray/api/v1/search/rentals?al=1"),
        );
        config.redfin.properties = Some(FeedConfig::new("https://www.redfin.com/custom"));
        let config = config.with_derived_properties();
        assert_eq!(config.feed(Feed::REDFIN_PROPERTIES).url, "https://www.redfin.com/custom");
        assert!(config.zillow.properties.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_relative_urls() {
        let config = RegionConfig::new("austin", FeedConfig::new("/rentals"), FeedConfig::new("x"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn region_names_are_lowercase_slugs() {
        let config = |name: &str| {
            RegionConfig::new(
                name,
                FeedConfig::new("https://www.zillow.com/homes/for_rent/"),
                FeedConfig::new("https://www.redfin.com/stingray/api/v1/search/rentals?market=x"),
            )
        };
        for ok in ["austin", "austin_tx", "salt-lake-city", "zip78701"] {
            assert!(config(ok).validate().is_ok(), "{ok}");
        }
        for bad in ["", "Austin", "austin tx", "_austin", "-austin", "austin*", "austín"] {
            assert!(config(bad).validate().is_err(), "{bad:?}");
        }
    }
}
