// src/config.rs

//! Command line and environment settings for the binary.

use crate::db::{ConnectionSettings, StoreSettings};
use crate::domain::{BucketFallback, MergePolicy, Precedence, ValuationDecorator, ValuationRates};
use crate::pipeline::{PipelineSettings, ScheduleSettings};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Elasticsearch node in a local docker container.
    Elastic,
    /// Single SQLite file, no external process.
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MergePrecedence {
    /// Zillow values win where both feeds report a field.
    Enrich,
    /// Redfin values win.
    Base,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "estate-metrics")]
#[command(about = "Scrapes rental and for-sale listings per region and stores market statistics")]
#[command(version)]
pub struct Settings {
    #[arg(long, value_enum, default_value = "elastic", env = "ESTATE_BACKEND")]
    pub backend: Backend,

    #[arg(long, default_value = "http://localhost:9200", env = "ESTATE_ELASTIC_URL")]
    pub elastic_url: String,

    /// Docker container hosting the search engine
    #[arg(long, default_value = "elasticsearch_estatemetrics", env = "ESTATE_CONTAINER")]
    pub container: String,

    #[arg(long, default_value = "estatemetrics.sqlite3", env = "ESTATE_SQLITE_PATH")]
    pub sqlite_path: PathBuf,

    /// Close the store after this long without use
    #[arg(long, default_value_t = 300, env = "ESTATE_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: u64,

    #[arg(long, default_value_t = 500, env = "ESTATE_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    #[arg(long, default_value_t = 3, env = "ESTATE_START_ATTEMPTS")]
    pub start_attempts: u32,

    /// Records per write batch
    #[arg(long, default_value_t = 1000, env = "ESTATE_BATCH_SIZE")]
    pub batch_size: usize,

    /// Skip regions that ran within this many hours
    #[arg(long, default_value_t = 23, env = "ESTATE_STALENESS_HOURS")]
    pub staleness_hours: i64,

    /// Ignore staleness and the pause between regions
    #[arg(long, env = "ESTATE_DEV_MODE")]
    pub dev_mode: bool,

    /// Hour of day (UTC) the daily batch starts
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(0..24), env = "ESTATE_SCHEDULE_HOUR")]
    pub schedule_hour: u32,

    #[arg(long, value_enum, default_value = "enrich", env = "ESTATE_MERGE_PRECEDENCE")]
    pub merge_precedence: MergePrecedence,

    /// Leave out properties with no matching rent bucket instead of falling back
    #[arg(long, env = "ESTATE_DROP_UNMATCHED")]
    pub drop_unmatched: bool,

    #[arg(long, default_value = "cache", env = "ESTATE_CACHE_DIR")]
    pub cache_dir: PathBuf,

    #[arg(long, default_value_t = 7, env = "ESTATE_CACHE_TTL_DAYS")]
    pub cache_ttl_days: u64,

    /// Fetch upstream feeds without the file cache
    #[arg(long)]
    pub no_cache: bool,

    /// Register the region config(s) in this JSON file before running
    #[arg(long)]
    pub register: Option<PathBuf>,

    /// Run one batch now and exit instead of scheduling
    #[arg(long)]
    pub run_once: bool,
}

impl Settings {
    pub fn connection(&self) -> ConnectionSettings {
        ConnectionSettings {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            start_attempts: self.start_attempts,
            ..ConnectionSettings::default()
        }
    }

    pub fn store(&self) -> StoreSettings {
        StoreSettings {
            batch_size: self.batch_size,
        }
    }

    pub fn pipeline(&self) -> PipelineSettings {
        let precedence = match self.merge_precedence {
            MergePrecedence::Enrich => Precedence::Enrich,
            MergePrecedence::Base => Precedence::Base,
        };
        PipelineSettings {
            staleness: chrono::Duration::hours(self.staleness_hours),
            dev_mode: self.dev_mode,
            merge_policy: MergePolicy {
                precedence,
                ..MergePolicy::default()
            },
        }
    }

    pub fn decorator(&self) -> ValuationDecorator {
        let fallback = if self.drop_unmatched {
            BucketFallback::Drop
        } else {
            BucketFallback::default()
        };
        ValuationDecorator::new(ValuationRates::default(), fallback)
    }

    pub fn schedule(&self) -> ScheduleSettings {
        ScheduleSettings {
            hour: self.schedule_hour,
            dev_mode: self.dev_mode,
            ..ScheduleSettings::default()
        }
    }

    /// `None` when caching is switched off.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (!self.no_cache).then(|| Duration::from_secs(self.cache_ttl_days * 24 * 60 * 60))
    }
}
