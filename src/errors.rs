// errors.rs
use crate::scraper::ScraperError;
use thiserror::Error;

/// Errors from the storage layer: the managed backing process, the
/// connection to it, and document operations on top.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be started after the configured number
    /// of attempts.
    #[error("storage unavailable after {attempts} start attempts: {reason}")]
    ConnectionUnavailable { attempts: u32, reason: String },

    #[error("storage operation cancelled")]
    Cancelled,

    /// Read paths may treat this as an empty result.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("{failed} documents in {batches} batches failed to write to {index}")]
    PartialBatchFailure {
        index: String,
        failed: usize,
        batches: usize,
    },

    /// Rejected before any write.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::IndexNotFound(_))
    }
}

/// Errors local to one region's pipeline run. The scheduler logs these and
/// moves on to the next region.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("upstream fetch failed for {feed}: {source}")]
    UpstreamFetchFailure {
        feed: String,
        #[source]
        source: ScraperError,
    },

    #[error("region not registered: {0}")]
    RegionNotRegistered(String),

    #[error("invalid region config for {region}: {reason}")]
    InvalidRegionConfig { region: String, reason: String },

    #[error("region run cancelled")]
    Cancelled,
}
