//! Flight status REST source.
//!
//! Polls a flight status API per monitored airport and normalizes the
//! payloads into departure legs. Code-shared entries are keyed by the
//! operating flight so marketing duplicates collapse onto one leg.

pub mod client;
pub mod error;

pub use error::FlightError;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use super::{LegSource, SourceBatch, SourceError};
use crate::config::FlightSyncConfig;
use crate::models::{LegDetails, LegStatus, NormalizedLeg, TransitMode};
use crate::store::canonical_time;
use client::{FlightApiClient, FlightStatus};

pub struct FlightSource {
    client: FlightApiClient,
    airports: Vec<String>,
}

impl FlightSource {
    pub fn new(config: &FlightSyncConfig) -> Result<Self, FlightError> {
        Ok(Self {
            client: FlightApiClient::new(config)?,
            airports: config.airports.clone(),
        })
    }
}

#[async_trait]
impl LegSource for FlightSource {
    fn name(&self) -> &'static str {
        "flights"
    }

    async fn fetch(&self, _now: DateTime<Utc>) -> Result<SourceBatch, SourceError> {
        let results = self.client.get_departures_batch(&self.airports).await;

        let mut batch = SourceBatch::default();
        let mut failed_airports = 0usize;
        for (airport, result) in results {
            let flights = match result {
                Ok(flights) => flights,
                Err(e) => {
                    warn!(airport = %airport, error = %e, "Failed to fetch flight departures");
                    failed_airports += 1;
                    continue;
                }
            };
            for flight in &flights {
                match normalize(flight) {
                    Some(leg) => batch.legs.push(leg),
                    None => batch.dropped += 1,
                }
            }
        }

        if failed_airports == self.airports.len() && !self.airports.is_empty() {
            return Err(FlightError::ApiError("All airport requests failed".into()).into());
        }

        info!(
            legs = batch.legs.len(),
            dropped = batch.dropped,
            failed_airports,
            "Normalized flight departures"
        );

        Ok(batch)
    }
}

/// Map one payload entry to a leg. `None` drops the entry: no flight
/// designator or no scheduled departure means there is nothing stable to
/// key the leg by.
fn normalize(flight: &FlightStatus) -> Option<NormalizedLeg> {
    let marketing = designator(flight.marketing_designator())?;
    let operating = designator(flight.codeshared_flight()).unwrap_or_else(|| marketing.clone());
    let dep_scheduled = parse_instant(flight.dep_scheduled())?;

    let service_date = flight
        .flight_date
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        .unwrap_or_else(|| dep_scheduled.date_naive());

    let mut leg = NormalizedLeg::new(
        TransitMode::Flight,
        format!("{}-{}", operating, canonical_time(dep_scheduled)),
        service_date,
    );
    leg.origin_code = flight.dep_iata().unwrap_or_default().to_string();
    leg.origin_name = flight.dep_airport().unwrap_or_default().to_string();
    leg.dest_code = flight.arr_iata().unwrap_or_default().to_string();
    leg.dest_name = flight.arr_airport().unwrap_or_default().to_string();
    leg.dep_scheduled = Some(dep_scheduled);
    leg.dep_estimated = parse_instant(flight.dep_estimated());
    leg.arr_scheduled = parse_instant(flight.arr_scheduled());
    leg.arr_estimated = parse_instant(flight.arr_estimated());
    leg.gate = flight.dep_gate().map(str::to_string);
    leg.terminal = flight.dep_terminal().map(str::to_string);
    leg.vehicle_id = flight.aircraft_registration().map(str::to_string);
    leg.route_short_name = Some(marketing);
    leg.source = "flights".into();
    leg.status = map_status(flight.status());
    leg.details = Some(LegDetails {
        aircraft: flight.aircraft_type().map(str::to_string),
        baggage: flight.arr_baggage().map(str::to_string),
        operated_by: flight.codeshared_airline().map(str::to_string),
    });
    Some(leg)
}

fn designator(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_uppercase())
}

fn parse_instant(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn map_status(value: Option<&str>) -> Option<LegStatus> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "cancelled" => Some(LegStatus::Canceled),
        "active" | "landed" => Some(LegStatus::Departed),
        _ => None,
    }
}
