//! Background sync: one ingest loop per enabled source plus the retention
//! sweep, with a shared status snapshot for the health endpoint.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::config::Config;
use crate::ingest::{IngestStats, IngestionPipeline};
use crate::models::attr;
use crate::providers::flights::FlightSource;
use crate::providers::schedule::ScheduleSource;
use crate::store::RecordStore;

/// Sync state of one source loop.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct SourceStatus {
    /// When the last cycle finished
    pub last_run: Option<DateTime<Utc>>,
    /// Counters of the last successful cycle
    pub last_stats: Option<IngestStats>,
    /// Error of the last cycle, cleared on success
    pub last_error: Option<String>,
    /// Completed cycles since startup
    pub cycles: u64,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct SyncStatus {
    pub schedule: SourceStatus,
    pub flights: SourceStatus,
    /// Legs removed by the retention sweep since startup
    pub removed_legs: u64,
}

pub struct SyncManager {
    store: Arc<dyn RecordStore>,
    pipeline: IngestionPipeline,
    schedule: Option<Arc<ScheduleSource>>,
    flights: Option<Arc<FlightSource>>,
    schedule_interval_secs: u64,
    flight_interval_secs: u64,
    housekeeping_interval_secs: u64,
    retention_hours: u32,
    categories: Vec<String>,
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncManager {
    /// Build the enabled sources from config. A source that is switched on
    /// but missing its feed URL, credentials or airports is disabled with a
    /// warning rather than failing startup.
    pub fn new(config: &Config, store: Arc<dyn RecordStore>) -> Result<Self, SyncError> {
        let schedule = if !config.schedule_sync.enabled {
            None
        } else if config.schedule_sync.feed_url.trim().is_empty() {
            warn!("Schedule sync enabled without a feed_url, disabling");
            None
        } else {
            let source = ScheduleSource::new(config.schedule_sync.clone())
                .map_err(|e| SyncError::ScheduleError(e.to_string()))?;
            Some(Arc::new(source))
        };

        let flights = if !config.flight_sync.enabled {
            None
        } else if config.flight_sync.access_key.trim().is_empty() {
            warn!("Flight sync enabled without an access_key, disabling");
            None
        } else if config.flight_sync.airports.is_empty() {
            warn!("Flight sync enabled without airports, disabling");
            None
        } else {
            let source = FlightSource::new(&config.flight_sync)
                .map_err(|e| SyncError::FlightError(e.to_string()))?;
            Some(Arc::new(source))
        };

        let pipeline = IngestionPipeline::new(
            store.clone(),
            config.delay_threshold_secs,
            config.mode_categories.clone(),
        );
        let categories: Vec<String> = config
            .mode_categories
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(Self {
            store,
            pipeline,
            schedule,
            flights,
            schedule_interval_secs: config.schedule_sync.interval_secs,
            flight_interval_secs: config.flight_sync.interval_secs,
            housekeeping_interval_secs: config.board.housekeeping_interval_secs,
            retention_hours: config.board.retention_hours,
            categories,
            status: Arc::new(RwLock::new(SyncStatus::default())),
        })
    }

    /// Shared status snapshot for the health endpoint.
    pub fn status(&self) -> Arc<RwLock<SyncStatus>> {
        self.status.clone()
    }

    /// Distinct category tags in use.
    pub fn categories(&self) -> Vec<String> {
        self.categories.clone()
    }

    /// Run all loops until the process stops. Each enabled source syncs
    /// immediately, then on its fixed interval; a hung source never stalls
    /// the other loops.
    pub async fn start(self: Arc<Self>) {
        info!("Starting sync manager");
        let mut handles = Vec::new();

        if let Some(schedule) = self.schedule.clone() {
            let manager = self.clone();
            let interval_secs = self.schedule_interval_secs;
            handles.push(tokio::spawn(async move {
                info!(interval_secs, "Starting schedule sync loop");
                let mut interval =
                    tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
                loop {
                    interval.tick().await;
                    manager.run_schedule_cycle(schedule.as_ref()).await;
                }
            }));
        }

        if let Some(flights) = self.flights.clone() {
            let manager = self.clone();
            let interval_secs = self.flight_interval_secs;
            handles.push(tokio::spawn(async move {
                info!(interval_secs, "Starting flight sync loop");
                let mut interval =
                    tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
                loop {
                    interval.tick().await;
                    manager.run_flight_cycle(flights.as_ref()).await;
                }
            }));
        }

        let manager = self.clone();
        let interval_secs = self.housekeeping_interval_secs;
        handles.push(tokio::spawn(async move {
            info!(interval_secs, "Starting housekeeping loop");
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                manager.sweep_expired_legs().await;
            }
        }));

        let _ = join_all(handles).await;
    }

    /// One schedule cycle: up to 3 attempts with linear backoff before the
    /// cycle is recorded as failed.
    async fn run_schedule_cycle(&self, source: &ScheduleSource) {
        let started = std::time::Instant::now();
        let max_retries = 3;
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.pipeline.run_source(source, Utc::now()).await {
                Ok(stats) => break Ok(stats),
                Err(e) => {
                    if attempt >= max_retries {
                        break Err(e);
                    }
                    let wait_secs = 10 * attempt;
                    error!(error = %e, attempt, wait_secs, "Schedule sync failed, retrying...");
                    tokio::time::sleep(tokio::time::Duration::from_secs(wait_secs)).await;
                }
            }
        };

        let mut status = self.status.write().await;
        status.schedule.last_run = Some(Utc::now());
        status.schedule.cycles += 1;
        match outcome {
            Ok(stats) => {
                status.schedule.last_stats = Some(stats);
                status.schedule.last_error = None;
                info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    created = stats.created,
                    updated = stats.updated,
                    errors = stats.errors,
                    "Schedule sync cycle complete"
                );
            }
            Err(e) => {
                status.schedule.last_error = Some(e.to_string());
                error!(error = %e, attempts = attempt, "Schedule sync cycle failed");
            }
        }
    }

    /// One flight cycle. No in-cycle retry: the poll interval is short and
    /// the next cycle retries naturally.
    async fn run_flight_cycle(&self, source: &FlightSource) {
        let started = std::time::Instant::now();
        let outcome = self.pipeline.run_source(source, Utc::now()).await;

        let mut status = self.status.write().await;
        status.flights.last_run = Some(Utc::now());
        status.flights.cycles += 1;
        match outcome {
            Ok(stats) => {
                status.flights.last_stats = Some(stats);
                status.flights.last_error = None;
                info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    created = stats.created,
                    updated = stats.updated,
                    errors = stats.errors,
                    "Flight sync cycle complete"
                );
            }
            Err(e) => {
                status.flights.last_error = Some(e.to_string());
                error!(error = %e, "Flight sync cycle failed");
            }
        }
    }

    /// Delete legs whose scheduled departure fell out of the retention
    /// window. The sweep is the only caller of `delete_record`.
    async fn sweep_expired_legs(&self) {
        let cutoff = Utc::now() - Duration::hours(i64::from(self.retention_hours));
        let mut removed = 0u64;
        for category in &self.categories {
            let records = match self.store.find_by_tag(category).await {
                Ok(records) => records,
                Err(e) => {
                    error!(category = %category, error = %e, "Housekeeping scan failed");
                    continue;
                }
            };
            for record in records {
                let Some(dep_scheduled) = record.attr_time(attr::DEP_SCHEDULED) else {
                    continue;
                };
                if dep_scheduled < cutoff {
                    match self.store.delete_record(&record.id).await {
                        Ok(()) => removed += 1,
                        Err(e) => {
                            error!(id = %record.id, error = %e, "Failed to delete expired leg");
                        }
                    }
                }
            }
        }

        if removed > 0 {
            let mut status = self.status.write().await;
            status.removed_legs += removed;
            info!(removed, cutoff = %cutoff, "Removed expired legs");
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Schedule source error: {0}")]
    ScheduleError(String),
    #[error("Flight source error: {0}")]
    FlightError(String),
}
