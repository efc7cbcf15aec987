//! Departure-leg sources.
//!
//! Each source turns one upstream system (batch schedule feed, flight
//! status API) into `NormalizedLeg`s behind the common `LegSource`
//! contract consumed by the ingestion pipeline.

pub mod flights;
pub mod schedule;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::NormalizedLeg;

/// One fetch cycle's worth of normalized legs. Records the source could
/// not normalize are dropped and counted, never propagated.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub legs: Vec<NormalizedLeg>,
    pub dropped: usize,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Schedule(#[from] schedule::ScheduleError),
    #[error(transparent)]
    Flight(#[from] flights::FlightError),
}

/// A provider of departure legs. A fetch failure is local to the source;
/// callers log it and keep the other sources running.
#[async_trait]
pub trait LegSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, now: DateTime<Utc>) -> Result<SourceBatch, SourceError>;
}
