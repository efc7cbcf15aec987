use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::warn;

use super::error::FlightError;
use crate::config::FlightSyncConfig;

/// Client for the flight status API
pub struct FlightApiClient {
    client: Client,
    base_url: String,
    access_key: String,
    limit_per_airport: u32,
    /// Semaphore to limit concurrent requests
    rate_limiter: Arc<Semaphore>,
}

impl FlightApiClient {
    pub fn new(config: &FlightSyncConfig) -> Result<Self, FlightError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FlightError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            access_key: config.access_key.clone(),
            limit_per_airport: config.limit_per_airport,
            rate_limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
        })
    }

    /// Fetch the departure list for one airport (IATA code).
    pub async fn get_departures(
        &self,
        airport_iata: &str,
    ) -> Result<Vec<FlightStatus>, FlightError> {
        let url = format!(
            "{}/flights?access_key={}&dep_iata={}&limit={}",
            self.base_url,
            urlencoding::encode(&self.access_key),
            urlencoding::encode(airport_iata),
            self.limit_per_airport
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FlightError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FlightError::ApiError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FlightError::NetworkError(e.to_string()))?;

        let result: Result<FlightListResponse, _> = serde_json::from_str(&body);
        if let Err(e) = &result {
            warn!(
                airport = airport_iata,
                error = %e,
                body = &body[..body.len().min(500)],
                "Failed to parse flight API response"
            );
        }

        result
            .map(|r| r.data)
            .map_err(|e| FlightError::ParseError(e.to_string()))
    }

    /// Fetch departures for multiple airports concurrently with rate limiting
    pub async fn get_departures_batch(
        &self,
        airports: &[String],
    ) -> Vec<(String, Result<Vec<FlightStatus>, FlightError>)> {
        let semaphore = self.rate_limiter.clone();

        let futures: Vec<_> = airports
            .iter()
            .map(|airport| {
                let airport = airport.clone();
                let sem = semaphore.clone();
                async move {
                    // Acquire permit before making request (limits concurrent requests)
                    let _permit = sem.acquire().await.expect("Semaphore closed unexpectedly");
                    let result = self.get_departures(&airport).await;
                    (airport, result)
                }
            })
            .collect();

        futures::future::join_all(futures).await
    }
}

// Response structures

#[derive(Debug, Clone, Deserialize)]
pub struct FlightListResponse {
    #[serde(default)]
    pub data: Vec<FlightStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightStatus {
    /// Service date of the flight, "YYYY-MM-DD"
    pub flight_date: Option<String>,
    /// One of "scheduled", "active", "landed", "cancelled", ...
    pub flight_status: Option<String>,
    pub departure: Option<FlightStop>,
    pub arrival: Option<FlightStop>,
    pub airline: Option<Airline>,
    pub flight: Option<FlightNumber>,
    pub aircraft: Option<Aircraft>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightStop {
    pub airport: Option<String>,
    pub iata: Option<String>,
    pub terminal: Option<String>,
    pub gate: Option<String>,
    pub baggage: Option<String>,
    /// RFC 3339 timestamp with offset
    pub scheduled: Option<String>,
    pub estimated: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Airline {
    pub name: Option<String>,
    pub iata: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightNumber {
    pub number: Option<String>,
    /// Marketing designator as published (e.g. "BA900")
    pub iata: Option<String>,
    /// Present when this entry is the marketing side of a code-share
    pub codeshared: Option<Codeshared>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Codeshared {
    pub airline_name: Option<String>,
    pub airline_iata: Option<String>,
    /// Designator of the operating flight (e.g. "aa100")
    pub flight_iata: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Aircraft {
    pub registration: Option<String>,
    /// Aircraft type code (e.g. "A320")
    pub iata: Option<String>,
}

impl FlightStatus {
    /// Get the marketing flight designator (e.g. "BA900")
    pub fn marketing_designator(&self) -> Option<&str> {
        self.flight.as_ref()?.iata.as_deref()
    }

    /// Get the operating flight designator when code-shared
    pub fn codeshared_flight(&self) -> Option<&str> {
        self.flight.as_ref()?.codeshared.as_ref()?.flight_iata.as_deref()
    }

    /// Get the operating carrier's name when code-shared
    pub fn codeshared_airline(&self) -> Option<&str> {
        self.flight.as_ref()?.codeshared.as_ref()?.airline_name.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.flight_status.as_deref()
    }

    pub fn dep_iata(&self) -> Option<&str> {
        self.departure.as_ref()?.iata.as_deref()
    }

    pub fn dep_airport(&self) -> Option<&str> {
        self.departure.as_ref()?.airport.as_deref()
    }

    pub fn dep_gate(&self) -> Option<&str> {
        self.departure.as_ref()?.gate.as_deref()
    }

    pub fn dep_terminal(&self) -> Option<&str> {
        self.departure.as_ref()?.terminal.as_deref()
    }

    pub fn dep_scheduled(&self) -> Option<&str> {
        self.departure.as_ref()?.scheduled.as_deref()
    }

    pub fn dep_estimated(&self) -> Option<&str> {
        self.departure.as_ref()?.estimated.as_deref()
    }

    pub fn arr_iata(&self) -> Option<&str> {
        self.arrival.as_ref()?.iata.as_deref()
    }

    pub fn arr_airport(&self) -> Option<&str> {
        self.arrival.as_ref()?.airport.as_deref()
    }

    pub fn arr_scheduled(&self) -> Option<&str> {
        self.arrival.as_ref()?.scheduled.as_deref()
    }

    pub fn arr_estimated(&self) -> Option<&str> {
        self.arrival.as_ref()?.estimated.as_deref()
    }

    pub fn arr_baggage(&self) -> Option<&str> {
        self.arrival.as_ref()?.baggage.as_deref()
    }

    pub fn aircraft_type(&self) -> Option<&str> {
        self.aircraft.as_ref()?.iata.as_deref()
    }

    pub fn aircraft_registration(&self) -> Option<&str> {
        self.aircraft.as_ref()?.registration.as_deref()
    }
}
