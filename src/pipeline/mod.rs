// src/pipeline/mod.rs

pub mod indexes;
pub mod region;
pub mod region_config;
pub mod scheduler;

pub use indexes::{IndexNames, REGISTERED_INDEXES};
pub use region::{is_stale, PipelineSettings, RegionOutcome, RegionPipeline, RegionState};
pub use region_config::{RegionConfig, SourceFeeds};
pub use scheduler::{next_run_after, BatchReport, RegionReport, ScheduleSettings, Scheduler};
