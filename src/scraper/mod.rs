// src/scraper/mod.rs

//! Upstream listing feeds.

mod cache;
mod models;
mod scraper;
mod scraper_error;

pub use cache::{CachedSource, FileCache};
pub use models::transform;
pub use scraper::HttpListingSource;
pub use scraper_error::ScraperError;

use crate::domain::Listing;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Redfin,
    Zillow,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Redfin => "redfin",
            Source::Zillow => "zillow",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Rentals,
    Properties,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Rentals => "rentals",
            FeedKind::Properties => "properties",
        }
    }
}

/// One upstream feed: a source and what it lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Feed {
    pub source: Source,
    pub kind: FeedKind,
}

impl Feed {
    pub const REDFIN_RENTALS: Feed = Feed::new(Source::Redfin, FeedKind::Rentals);
    pub const ZILLOW_RENTALS: Feed = Feed::new(Source::Zillow, FeedKind::Rentals);
    pub const REDFIN_PROPERTIES: Feed = Feed::new(Source::Redfin, FeedKind::Properties);
    pub const ZILLOW_PROPERTIES: Feed = Feed::new(Source::Zillow, FeedKind::Properties);

    pub const fn new(source: Source, kind: FeedKind) -> Self {
        Self { source, kind }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.source, self.kind.as_str())
    }
}

/// Request details for one feed, as registered for a region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    /// JSON body; when present the request is a PUT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Anything else registered with the feed; stored as collection metadata.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Fetches and normalizes one feed into listings.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch(&self, feed: Feed, config: &FeedConfig) -> Result<Vec<Listing>, ScraperError>;
}
