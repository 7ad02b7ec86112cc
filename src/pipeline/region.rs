// src/pipeline/region.rs

//! One region's sync: scrape four feeds, merge, report, decorate, persist.
//!
//! A run moves through
//! `Idle → Scraping → Merging → Reporting → Decorating → Persisting → Idle`.
//! Any failure moves it to `Failed` and nothing more is written for that
//! region, in particular not `lastRan`, so the next scheduled run retries.

use crate::db::{
    BatchResult, Connector, Dataset, DocumentBackend, DocumentStore, Metadata, Query, UpsertOptions,
    DEFAULT_PAGE_SIZE,
};
use crate::domain::normalize::fingerprint;
use crate::domain::{
    merge, DecoratedProperty, Listing, MarketReport, MarketStatisticsEngine, MergePolicy,
    ValuationDecorator,
};
use crate::errors::{PipelineError, StoreError};
use crate::pipeline::indexes::{IndexNames, REGISTERED_INDEXES};
use crate::pipeline::region_config::RegionConfig;
use crate::scraper::{Feed, ListingSource};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionState {
    Idle,
    Scraping,
    Merging,
    Reporting,
    Decorating,
    Persisting,
    Failed,
}

/// How one region's sync ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RegionOutcome {
    Synced { decorated: usize },
    /// Ran too recently.
    Skipped,
    Failed { stage: RegionState, error: String },
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// A region that ran less than this long ago is skipped.
    pub staleness: Duration,
    /// Ignore staleness entirely.
    pub dev_mode: bool,
    pub merge_policy: MergePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            staleness: Duration::hours(23),
            dev_mode: false,
            merge_policy: MergePolicy::default(),
        }
    }
}

/// Tracks one run's state for logging and failure reporting.
#[derive(Debug)]
pub struct RegionRun {
    region: String,
    state: RegionState,
    started: Instant,
}

impl RegionRun {
    fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            state: RegionState::Idle,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> RegionState {
        self.state
    }

    fn transition_to(&mut self, new_state: RegionState) {
        debug!(
            region = %self.region,
            from = ?self.state,
            to = ?new_state,
            elapsed = ?self.started.elapsed(),
            "region state"
        );
        self.state = new_state;
    }
}

/// Whether a region last run at `last_ran` is due at `now`.
pub fn is_stale(last_ran: Option<DateTime<Utc>>, now: DateTime<Utc>, staleness: Duration) -> bool {
    match last_ran {
        Some(last) => now - last > staleness,
        None => true,
    }
}

fn last_ran_of(meta: &Metadata) -> Option<DateTime<Utc>> {
    meta.get("lastRan")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

struct Scraped {
    redfin_rentals: Vec<Listing>,
    zillow_rentals: Vec<Listing>,
    redfin_properties: Vec<Listing>,
    zillow_properties: Vec<Listing>,
}

struct Processed {
    combined_rentals: Vec<Listing>,
    report: MarketReport,
    decorated: Vec<DecoratedProperty>,
}

fn object(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub struct RegionPipeline<C: Connector> {
    store: DocumentStore<C>,
    source: Arc<dyn ListingSource>,
    engine: MarketStatisticsEngine,
    decorator: ValuationDecorator,
    settings: PipelineSettings,
    cancel: CancellationToken,
}

impl<C> RegionPipeline<C>
where
    C: Connector,
    C::Client: DocumentBackend,
{
    pub fn new(
        store: DocumentStore<C>,
        source: Arc<dyn ListingSource>,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            source,
            engine: MarketStatisticsEngine::default(),
            decorator: ValuationDecorator::default(),
            settings,
            cancel,
        }
    }

    pub fn with_engine(mut self, engine: MarketStatisticsEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_decorator(mut self, decorator: ValuationDecorator) -> Self {
        self.decorator = decorator;
        self
    }

    pub fn store(&self) -> &DocumentStore<C> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Reads `lastRan` from the region's metadata. Dev mode always runs.
    pub async fn should_run(&self, region: &str) -> bool {
        if self.settings.dev_mode {
            return true;
        }
        let meta = self.store.metadata(region).await;
        is_stale(last_ran_of(&meta), Utc::now(), self.settings.staleness)
    }

    /// Stores (or replaces) a region's feed configuration.
    pub async fn register_region(&self, config: RegionConfig) -> Result<RegionConfig, PipelineError> {
        config
            .validate()
            .map_err(|reason| PipelineError::InvalidRegionConfig {
                region: config.region.clone(),
                reason,
            })?;

        let now = Utc::now();
        let mut config = config.with_derived_properties();
        config.id = Some(fingerprint(&config.region));
        config.related_indexes = IndexNames::for_region(&config.region).all();
        config.last_ran = Some(now);

        let dataset = Dataset::from_records(std::slice::from_ref(&config))?
            .with_meta(object(json!({ "lastRan": now })));
        self.store
            .upsert_with(REGISTERED_INDEXES, dataset, UpsertOptions { infer_types: false })
            .await?
            .into_result(REGISTERED_INDEXES)?;

        info!(region = %config.region, "region registered");
        Ok(config)
    }

    pub async fn region_config(&self, region: &str) -> Result<RegionConfig, PipelineError> {
        let query = Query::term("id", fingerprint(region));
        let found = match self.store.get(REGISTERED_INDEXES, &query, 1).await {
            Ok(collection) => collection.records,
            Err(StoreError::IndexNotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let record = found
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::RegionNotRegistered(region.to_string()))?;
        serde_json::from_value(Value::Object(record)).map_err(|e| PipelineError::InvalidRegionConfig {
            region: region.to_string(),
            reason: e.to_string(),
        })
    }

    /// Every registered region. Unreadable records are logged and skipped.
    pub async fn registered_regions(&self) -> Result<Vec<RegionConfig>, PipelineError> {
        let records = match self.store.get(REGISTERED_INDEXES, &Query::All, DEFAULT_PAGE_SIZE).await {
            Ok(collection) => collection.records,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut configs: Vec<RegionConfig> = records
            .into_iter()
            .filter_map(|record| match serde_json::from_value(Value::Object(record)) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable region record");
                    None
                }
            })
            .collect();
        configs.sort_by(|a, b| a.region.cmp(&b.region));
        Ok(configs)
    }

    /// Syncs one region, returning `Skipped` if it ran within the staleness
    /// window. Errors leave previously stored data and `lastRan` untouched.
    pub async fn fetch_region(&self, region: &str) -> Result<RegionOutcome, PipelineError> {
        let mut run = RegionRun::new(region);
        self.run(region, &mut run).await
    }

    /// Like [`fetch_region`](Self::fetch_region), but folds failures into the
    /// outcome so a batch can carry on.
    pub async fn sync_region(&self, region: &str) -> RegionOutcome {
        let mut run = RegionRun::new(region);
        match self.run(region, &mut run).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let stage = run.state();
                run.transition_to(RegionState::Failed);
                error!(region, stage = ?stage, error = %e, "region sync failed");
                RegionOutcome::Failed {
                    stage,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run(&self, region: &str, run: &mut RegionRun) -> Result<RegionOutcome, PipelineError> {
        if !self.should_run(region).await {
            info!(region, "region ran recently, skipping");
            return Ok(RegionOutcome::Skipped);
        }
        let config = self.region_config(region).await?;
        let indexes = IndexNames::for_region(region);

        run.transition_to(RegionState::Scraping);
        let scraped = self.scrape(&config).await?;

        let processed = self.process(&scraped, run);

        run.transition_to(RegionState::Persisting);
        self.persist(&config, &indexes, &scraped, &processed).await?;

        let decorated = processed.decorated.len();
        run.transition_to(RegionState::Idle);
        info!(
            region,
            decorated,
            rentals = processed.combined_rentals.len(),
            buckets = processed.report.records.len(),
            elapsed = ?run.started.elapsed(),
            "region synced"
        );
        Ok(RegionOutcome::Synced { decorated })
    }

    async fn fetch_feed(&self, config: &RegionConfig, feed: Feed) -> Result<Vec<Listing>, PipelineError> {
        self.source
            .fetch(feed, &config.feed(feed))
            .await
            .map_err(|source| PipelineError::UpstreamFetchFailure {
                feed: feed.to_string(),
                source,
            })
    }

    /// All four feeds concurrently. Any failure fails the region.
    async fn scrape(&self, config: &RegionConfig) -> Result<Scraped, PipelineError> {
        let fetches = async {
            tokio::join!(
                self.fetch_feed(config, Feed::REDFIN_RENTALS),
                self.fetch_feed(config, Feed::ZILLOW_RENTALS),
                self.fetch_feed(config, Feed::REDFIN_PROPERTIES),
                self.fetch_feed(config, Feed::ZILLOW_PROPERTIES),
            )
        };
        let (redfin_rentals, zillow_rentals, redfin_properties, zillow_properties) = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            results = fetches => results,
        };
        Ok(Scraped {
            redfin_rentals: redfin_rentals?,
            zillow_rentals: zillow_rentals?,
            redfin_properties: redfin_properties?,
            zillow_properties: zillow_properties?,
        })
    }

    fn process(&self, scraped: &Scraped, run: &mut RegionRun) -> Processed {
        let policy = &self.settings.merge_policy;

        run.transition_to(RegionState::Merging);
        let combined_rentals = merge(
            scraped.redfin_rentals.clone(),
            scraped.zillow_rentals.clone(),
            policy,
        );
        let combined_properties = merge(
            scraped.redfin_properties.clone(),
            scraped.zillow_properties.clone(),
            policy,
        );

        run.transition_to(RegionState::Reporting);
        let report = self.engine.analyze(&combined_rentals);

        run.transition_to(RegionState::Decorating);
        let decorated = self.decorator.decorate(&combined_properties, &report);

        Processed {
            combined_rentals,
            report,
            decorated,
        }
    }

    async fn persist(
        &self,
        config: &RegionConfig,
        indexes: &IndexNames,
        scraped: &Scraped,
        processed: &Processed,
    ) -> Result<(), PipelineError> {
        let now = Utc::now();
        let region = config.region.as_str();
        let stamp = |mut meta: Metadata| {
            meta.insert("lastRan".into(), json!(now));
            meta.insert("region".into(), json!(region));
            meta
        };
        let feed_meta = |feed: Feed| -> Result<Metadata, PipelineError> {
            Ok(stamp(object(serde_json::to_value(config.feed(feed)).map_err(StoreError::from)?)))
        };
        let region_meta = object(serde_json::to_value(config).map_err(StoreError::from)?);

        let report_record = json!({
            "region": region,
            "generatedAt": now,
            "records": processed.report.records,
        });
        let mut decorated_meta = stamp(region_meta.clone());
        decorated_meta.insert(
            "rentalReport".into(),
            serde_json::to_value(&processed.report).map_err(StoreError::from)?,
        );

        let artifacts: Vec<(&str, Dataset)> = vec![
            (
                indexes.redfin_rentals.as_str(),
                Dataset::from_records(&scraped.redfin_rentals)?.with_meta(feed_meta(Feed::REDFIN_RENTALS)?),
            ),
            (
                indexes.zillow_rentals.as_str(),
                Dataset::from_records(&scraped.zillow_rentals)?.with_meta(feed_meta(Feed::ZILLOW_RENTALS)?),
            ),
            (
                indexes.rental_report.as_str(),
                Dataset::from_records(&[report_record])?.with_meta(stamp(region_meta.clone())),
            ),
            (
                indexes.redfin_properties.as_str(),
                Dataset::from_records(&scraped.redfin_properties)?
                    .with_meta(feed_meta(Feed::REDFIN_PROPERTIES)?),
            ),
            (
                indexes.zillow_properties.as_str(),
                Dataset::from_records(&scraped.zillow_properties)?
                    .with_meta(feed_meta(Feed::ZILLOW_PROPERTIES)?),
            ),
            (
                indexes.combined_rentals.as_str(),
                Dataset::from_records(&processed.combined_rentals)?.with_meta(stamp(Metadata::new())),
            ),
            (
                indexes.combined_properties.as_str(),
                Dataset::from_records(&processed.decorated)?.with_meta(decorated_meta),
            ),
        ];

        // No rollback. A failure leaves earlier artifacts rewritten and
        // `lastRan` unset, so the next run redoes all of them.
        let mut partial: Option<(String, BatchResult)> = None;
        for (index, dataset) in artifacts {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let result = self.store.upsert(index, dataset).await?;
            if result.is_partial() && partial.is_none() {
                partial = Some((index.to_string(), result));
            }
        }
        if let Some((index, result)) = partial {
            result.into_result(&index)?;
        }

        self.store
            .update_metadata(region, stamp(Metadata::new()))
            .await?;
        Ok(())
    }
}
