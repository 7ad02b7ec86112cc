// src/scraper/cache.rs

//! On-disk cache of scraped feeds, so repeated runs inside the TTL do not
//! hit the upstream sites again.

use crate::domain::Listing;
use crate::scraper::{Feed, FeedConfig, ListingSource, ScraperError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// JSON files named by the SHA-256 of their key.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{digest:x}.json"))
    }

    /// The cached value, if present, younger than the TTL and readable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let modified = tokio::fs::metadata(&path).await.ok()?.modified().ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.ttl {
            debug!(key, ?age, "cache entry expired");
            return None;
        }

        let text = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&text) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "unreadable cache entry");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ScraperError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let text = serde_json::to_string(value)?;
        tokio::fs::write(self.path_for(key), text).await?;
        Ok(())
    }
}

/// Wraps a source with a [`FileCache`] keyed by the request it would make.
pub struct CachedSource<S> {
    inner: S,
    cache: FileCache,
}

impl<S> CachedSource<S> {
    pub fn new(inner: S, cache: FileCache) -> Self {
        Self { inner, cache }
    }
}

fn cache_key(config: &FeedConfig) -> String {
    match &config.payload {
        Some(payload) => format!("{}\n{}", config.url, payload),
        None => config.url.clone(),
    }
}

#[async_trait]
impl<S: ListingSource> ListingSource for CachedSource<S> {
    async fn fetch(&self, feed: Feed, config: &FeedConfig) -> Result<Vec<Listing>, ScraperError> {
        let key = cache_key(config);
        if let Some(listings) = self.cache.get::<Vec<Listing>>(&key).await {
            return Ok(listings);
        }

        let listings = self.inner.fetch(feed, config).await?;
        if let Err(e) = self.cache.set(&key, &listings).await {
            warn!(%feed, error = %e, "failed to write feed cache");
        }
        Ok(listings)
    }
}
