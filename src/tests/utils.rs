// src/tests/utils.rs
use crate::db::{
    ConnectionSettings, Connector, Document, DocumentBackend, DocumentFailure, DocumentStore,
    Metadata, ProcessManager, Query, Schema, SqliteClient, SqliteConnector, StorageConnection,
    StoreSettings,
};
use crate::domain::Listing;
use crate::errors::StoreError;
use crate::scraper::{Feed, FeedConfig, ListingSource, ScraperError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Process that counts start/stop commands. It becomes healthy once started
/// unless `never_healthy` is set.
#[derive(Default)]
pub struct MockProcess {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub running: Arc<AtomicBool>,
    pub fail_start: bool,
    pub never_healthy: bool,
    /// Like `docker stop`: the process goes down this long after the stop
    /// is issued, whether or not anyone still waits for it.
    pub stop_delay: Duration,
}

impl MockProcess {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            never_healthy: true,
            ..Default::default()
        }
    }

    pub fn slow_stop(stop_delay: Duration) -> Self {
        Self {
            stop_delay,
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessManager for MockProcess {
    async fn is_healthy(&self) -> bool {
        !self.never_healthy && self.running.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<(), StoreError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent acquirers get a chance to pile up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail_start {
            return Err(StoreError::Backend("docker unavailable".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), StoreError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let delay = self.stop_delay;
        let stopping = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            running.store(false, Ordering::SeqCst);
        });
        stopping
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        idle_timeout: Duration::from_secs(60),
        poll_interval: Duration::from_millis(10),
        start_attempts: 3,
        start_backoff: Duration::from_millis(10),
    }
}

pub fn connection(
    process: Arc<MockProcess>,
    settings: ConnectionSettings,
    cancel: CancellationToken,
) -> StorageConnection<SqliteConnector> {
    StorageConnection::new(SqliteConnector::in_memory(), process, settings, cancel)
}

/// A document store over a private in-memory SQLite database.
pub fn memory_store(batch_size: usize) -> DocumentStore<SqliteConnector> {
    let conn = connection(
        Arc::new(MockProcess::default()),
        fast_settings(),
        CancellationToken::new(),
    );
    DocumentStore::new(conn, StoreSettings { batch_size })
}

/// SQLite underneath, but refuses some writes:
/// - every document written to `failing_index`, per document with status 400
/// - any document carrying `"reject": true`, per document with status 400
/// - a whole batch containing a document with `"explode": true`
pub struct FlakyConnector {
    inner: SqliteConnector,
    failing_index: Option<String>,
}

pub struct FlakyClient {
    inner: SqliteClient,
    failing_index: Option<String>,
}

#[async_trait]
impl Connector for FlakyConnector {
    type Client = FlakyClient;

    async fn connect(&self) -> Result<FlakyClient, StoreError> {
        Ok(FlakyClient {
            inner: self.inner.connect().await?,
            failing_index: self.failing_index.clone(),
        })
    }
}

fn flag(doc: &Document, key: &str) -> bool {
    doc.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

#[async_trait]
impl DocumentBackend for FlakyClient {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.exists(name).await
    }

    async fn create(&self, name: &str, schema: Option<&Schema>) -> Result<(), StoreError> {
        self.inner.create(name, schema).await
    }

    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.drop_collection(name).await
    }

    async fn read_meta(&self, name: &str) -> Result<Option<Metadata>, StoreError> {
        self.inner.read_meta(name).await
    }

    async fn write_meta(&self, name: &str, meta: &Metadata) -> Result<(), StoreError> {
        self.inner.write_meta(name, meta).await
    }

    async fn read_schema(&self, name: &str) -> Result<Option<Schema>, StoreError> {
        self.inner.read_schema(name).await
    }

    async fn write_batch(
        &self,
        name: &str,
        docs: &[Document],
    ) -> Result<Vec<DocumentFailure>, StoreError> {
        if docs.iter().any(|doc| flag(doc, "explode")) {
            return Err(StoreError::Backend("bulk request rejected".into()));
        }
        let refuse_all = self.failing_index.as_deref() == Some(name);
        let (refused, accepted): (Vec<Document>, Vec<Document>) = docs
            .iter()
            .cloned()
            .partition(|doc| refuse_all || flag(doc, "reject"));

        let mut failures = self.inner.write_batch(name, &accepted).await?;
        failures.extend(refused.iter().map(|doc| DocumentFailure {
            id: doc.get("id").and_then(|v| v.as_str()).map(str::to_string),
            status: Some(400),
            reason: "mapper_parsing_exception".into(),
        }));
        Ok(failures)
    }

    async fn search(
        &self,
        name: &str,
        query: &Query,
        size: usize,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.search(name, query, size).await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list().await
    }
}

pub fn flaky_store(batch_size: usize, failing_index: Option<&str>) -> DocumentStore<FlakyConnector> {
    let connector = FlakyConnector {
        inner: SqliteConnector::in_memory(),
        failing_index: failing_index.map(str::to_string),
    };
    let conn = StorageConnection::new(
        connector,
        Arc::new(MockProcess::default()),
        fast_settings(),
        CancellationToken::new(),
    );
    DocumentStore::new(conn, StoreSettings { batch_size })
}

/// Never answers, like an upstream that hangs past every timeout.
pub struct PendingSource;

#[async_trait]
impl ListingSource for PendingSource {
    async fn fetch(&self, _feed: Feed, _config: &FeedConfig) -> Result<Vec<Listing>, ScraperError> {
        std::future::pending().await
    }
}

/// Serves canned listings per feed. Feeds without an entry fail.
#[derive(Default)]
pub struct MockSource {
    feeds: Mutex<HashMap<Feed, Vec<Listing>>>,
    pub calls: AtomicUsize,
}

impl MockSource {
    pub fn with(self, feed: Feed, listings: Vec<Listing>) -> Self {
        self.feeds.lock().insert(feed, listings);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for MockSource {
    async fn fetch(&self, feed: Feed, _config: &FeedConfig) -> Result<Vec<Listing>, ScraperError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.feeds
            .lock()
            .get(&feed)
            .cloned()
            .ok_or_else(|| ScraperError::Blocked(format!("{feed} returned 403")))
    }
}

pub fn rental(address: &str, beds: u32, price: i64, area: f64) -> Listing {
    let mut listing = Listing::from_address(address);
    listing.beds = Some(beds);
    listing.price = Some(price);
    listing.area = Some(area);
    listing
}

/// `count` distinct rentals with the given bedroom count and rents
/// `base, base + step, ...`.
pub fn rentals(street: &str, count: usize, beds: u32, base: i64, step: i64) -> Vec<Listing> {
    (0..count)
        .map(|i| {
            rental(
                &format!("{} {street} St", 100 + i),
                beds,
                base + step * i as i64,
                800.0 + 50.0 * i as f64,
            )
        })
        .collect()
}
