//! Ingestion pipeline: resolve every normalized leg to a stored identity
//! and merge it, isolating per-leg failures from the rest of the batch.

pub mod identity;
pub mod merge;
pub mod status;

pub use identity::IdentityResolver;
pub use merge::MergeEngine;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::models::{NormalizedLeg, TransitMode};
use crate::providers::LegSource;
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No board category configured for mode: {0}")]
    ConfigurationMissing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome counters for one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct IngestStats {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
}

pub struct IngestionPipeline {
    resolver: IdentityResolver,
    merger: MergeEngine,
    mode_categories: HashMap<TransitMode, String>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        delay_threshold_secs: u32,
        mode_categories: HashMap<TransitMode, String>,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(store.clone()),
            merger: MergeEngine::new(store, delay_threshold_secs),
            mode_categories,
        }
    }

    /// Merge a batch sequentially. One leg failing is counted and logged,
    /// never fatal for the rest.
    pub async fn ingest_batch(&self, legs: &[NormalizedLeg]) -> IngestStats {
        let mut stats = IngestStats::default();
        for leg in legs {
            stats.processed += 1;
            match self.ingest_leg(leg).await {
                Ok(true) => stats.created += 1,
                Ok(false) => stats.updated += 1,
                Err(e) => {
                    warn!(
                        trip_id = %leg.trip_id,
                        service_date = %leg.service_date,
                        source = %leg.source,
                        error = %e,
                        "Failed to ingest leg"
                    );
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    /// `Ok(true)` created a record, `Ok(false)` updated an existing one.
    async fn ingest_leg(&self, leg: &NormalizedLeg) -> Result<bool, IngestError> {
        let category = self
            .mode_categories
            .get(&leg.mode)
            .ok_or_else(|| IngestError::ConfigurationMissing(leg.mode.as_str().to_string()))?;
        match self.resolver.resolve(leg).await? {
            Some(stored) => {
                self.merger.update_leg(&stored, leg).await?;
                Ok(false)
            }
            None => {
                self.merger.create_leg(leg, category).await?;
                Ok(true)
            }
        }
    }

    /// Fetch one source and merge its batch; the source's own drops count
    /// as errors. A failed fetch is the caller's to log and retry.
    pub async fn run_source(
        &self,
        source: &dyn LegSource,
        now: DateTime<Utc>,
    ) -> Result<IngestStats, crate::providers::SourceError> {
        let batch = source.fetch(now).await?;
        let mut stats = self.ingest_batch(&batch.legs).await;
        stats.errors += batch.dropped;
        info!(
            source = source.name(),
            processed = stats.processed,
            created = stats.created,
            updated = stats.updated,
            errors = stats.errors,
            "Ingest run finished"
        );
        Ok(stats)
    }

    /// Fetch every source concurrently, then merge one combined batch
    /// sequentially. A source that fails outright is skipped with a warning.
    pub async fn run_cycle(&self, sources: &[Arc<dyn LegSource>], now: DateTime<Utc>) -> IngestStats {
        let results = join_all(sources.iter().map(|source| source.fetch(now))).await;

        let mut legs = Vec::new();
        let mut dropped = 0usize;
        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok(batch) => {
                    dropped += batch.dropped;
                    legs.extend(batch.legs);
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Source fetch failed, skipping");
                }
            }
        }

        let mut stats = self.ingest_batch(&legs).await;
        stats.errors += dropped;
        info!(
            sources = sources.len(),
            processed = stats.processed,
            created = stats.created,
            updated = stats.updated,
            errors = stats.errors,
            "Ingest cycle finished"
        );
        stats
    }
}
