// src/scraper/scraper.rs
use crate::domain::Listing;
use crate::scraper::models::transform;
use crate::scraper::{Feed, FeedConfig, ListingSource, ScraperError};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, ORIGIN};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Redfin prefixes JSON responses with this to defeat JSON hijacking.
const HIJACK_PREFIX: &str = "{}&&";

/// Fetches listing feeds over HTTP, retrying transient failures.
pub struct HttpListingSource {
    client: Client,
    max_attempts: u64,
}

pub(crate) fn strip_hijack_prefix(text: &str) -> &str {
    let trimmed = text.trim_start();
    trimmed.strip_prefix(HIJACK_PREFIX).unwrap_or(trimmed)
}

impl HttpListingSource {
    pub fn new() -> Result<Self, ScraperError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .gzip(true)
            .build()
            .map_err(|e| ScraperError::Network(e.to_string()))?;

        Ok(Self {
            client,
            max_attempts: 5,
        })
    }

    pub async fn fetch_body(&self, feed: Feed, config: &FeedConfig) -> Result<String, ScraperError> {
        const MAX_BACKOFF_SECS: u64 = 10;
        const JITTER_MAX_SECS: u64 = 2;

        let url = Url::parse(&config.url)
            .map_err(|e| ScraperError::Config(format!("bad {feed} url {}: {e}", config.url)))?;

        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            let start = Instant::now();

            match self.try_fetch(&url, config).await {
                Ok(body) => {
                    debug!(%feed, attempt, elapsed = ?start.elapsed(), "feed fetched");
                    return Ok(body);
                }
                Err(e) => {
                    warn!(%feed, attempt, elapsed = ?start.elapsed(), error = %e, "feed fetch failed");
                    last_err = Some(e);

                    if attempt == self.max_attempts {
                        break;
                    }
                    // backoff
                    let base = std::cmp::min(2 * attempt, MAX_BACKOFF_SECS);
                    let jitter = rand::thread_rng().gen_range(0..=JITTER_MAX_SECS);
                    tokio::time::sleep(Duration::from_secs(base + jitter)).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ScraperError::Network(format!("{feed} retry loop failed"))))
    }

    async fn try_fetch(&self, url: &Url, config: &FeedConfig) -> Result<String, ScraperError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if let Ok(origin) = HeaderValue::from_str(&url.origin().ascii_serialization()) {
            headers.insert(ORIGIN, origin);
        }
        if let Some(cookie) = &config.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| ScraperError::Config(format!("cookie header: {e}")))?;
            headers.insert(COOKIE, value);
        }

        let request = match &config.payload {
            Some(payload) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                self.client.put(url.clone()).json(payload)
            }
            None => self.client.get(url.clone()),
        };

        let resp = request.headers(headers).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ScraperError::Blocked(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ScraperError::Network(format!("HTTP {status}: {}", truncate(&text, 200))));
        }
        Ok(text)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch(&self, feed: Feed, config: &FeedConfig) -> Result<Vec<Listing>, ScraperError> {
        let body = self.fetch_body(feed, config).await?;
        let json: Value = serde_json::from_str(strip_hijack_prefix(&body))?;
        let listings = transform(feed, json, Utc::now())?;
        info!(%feed, count = listings.len(), "feed scraped");
        Ok(listings)
    }
}
