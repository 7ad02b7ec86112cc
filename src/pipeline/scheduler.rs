// src/pipeline/scheduler.rs

//! Daily batch over every registered region.

use crate::db::{Connector, DocumentBackend};
use crate::pipeline::region::{RegionOutcome, RegionPipeline};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    /// Hour of day (UTC) the batch starts in.
    pub hour: u32,
    /// Pause between regions is drawn from this range, in seconds.
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    /// No pause between regions.
    pub dev_mode: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            hour: 7,
            min_delay_secs: 10,
            max_delay_secs: 59,
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub region: String,
    #[serde(flatten)]
    pub outcome: RegionOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub regions: Vec<RegionReport>,
    /// True when cancellation stopped the batch before every region ran.
    pub interrupted: bool,
}

impl BatchReport {
    pub fn synced(&self) -> usize {
        self.count(|o| matches!(o, RegionOutcome::Synced { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, RegionOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RegionOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&RegionOutcome) -> bool) -> usize {
        self.regions.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// The first `hour:minute` (UTC) strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour % 24, minute % 60, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

pub struct Scheduler<C: Connector> {
    pipeline: Arc<RegionPipeline<C>>,
    settings: ScheduleSettings,
    /// Picked once so the batch runs at the same minute every day.
    minute: u32,
    cancel: CancellationToken,
}

impl<C> Scheduler<C>
where
    C: Connector,
    C::Client: DocumentBackend,
{
    pub fn new(
        pipeline: Arc<RegionPipeline<C>>,
        settings: ScheduleSettings,
        cancel: CancellationToken,
    ) -> Self {
        let minute = rand::thread_rng().gen_range(0..60);
        Self {
            pipeline,
            settings,
            minute,
            cancel,
        }
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Runs a batch every day until cancelled.
    pub async fn run(&self) {
        info!(
            hour = self.settings.hour,
            minute = self.minute,
            "scheduling daily region sync (UTC)"
        );
        loop {
            let now = Utc::now();
            let next = next_run_after(now, self.settings.hour, self.minute);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, "next region sync");

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let report = self.run_batch().await;
            if report.interrupted {
                info!("scheduler stopped mid-batch");
                return;
            }
        }
    }

    /// Syncs every registered region in turn. One region's failure never
    /// stops the rest.
    pub async fn run_batch(&self) -> BatchReport {
        let started_at = Utc::now();
        let mut report = BatchReport {
            started_at,
            finished_at: started_at,
            regions: Vec::new(),
            interrupted: false,
        };

        let regions = match self.pipeline.registered_regions().await {
            Ok(regions) => regions,
            Err(e) => {
                error!(error = %e, "could not load registered regions");
                report.finished_at = Utc::now();
                return report;
            }
        };
        let names: Vec<&str> = regions.iter().map(|r| r.region.as_str()).collect();
        info!(regions = ?names, "starting region sync batch");

        for (i, region) in names.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let outcome = self.pipeline.sync_region(region).await;
            report.regions.push(RegionReport {
                region: region.to_string(),
                outcome,
            });

            if i + 1 < names.len() && !self.pause_between_regions().await {
                report.interrupted = true;
                break;
            }
        }

        report.finished_at = Utc::now();
        info!(
            synced = report.synced(),
            skipped = report.skipped(),
            failed = report.failed(),
            "region sync batch finished"
        );
        report
    }

    /// Returns false if cancelled while waiting.
    async fn pause_between_regions(&self) -> bool {
        if self.settings.dev_mode {
            return !self.cancel.is_cancelled();
        }
        let (lo, hi) = (
            self.settings.min_delay_secs,
            self.settings.max_delay_secs.max(self.settings.min_delay_secs),
        );
        let secs = rand::thread_rng().gen_range(lo..=hi);
        info!(secs, "waiting before the next region");
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => true,
        }
    }
}
