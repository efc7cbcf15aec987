//! Domain types shared by the providers, the ingestion pipeline and the
//! board.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::{AttrValue, LegRecord};

/// Attribute names used on leg records in the record store.
pub mod attr {
    pub const MODE: &str = "mode";
    pub const TRIP_ID: &str = "trip_id";
    pub const SERVICE_DATE: &str = "service_date";
    pub const ORIGIN_CODE: &str = "origin_code";
    pub const ORIGIN_NAME: &str = "origin_name";
    pub const DEST_CODE: &str = "dest_code";
    pub const DEST_NAME: &str = "dest_name";
    pub const HEADSIGN: &str = "headsign";
    pub const DEP_SCHEDULED: &str = "dep_scheduled";
    pub const DEP_ESTIMATED: &str = "dep_estimated";
    pub const ARR_SCHEDULED: &str = "arr_scheduled";
    pub const ARR_ESTIMATED: &str = "arr_estimated";
    pub const PLATFORM: &str = "platform";
    pub const GATE: &str = "gate";
    pub const TERMINAL: &str = "terminal";
    pub const VEHICLE_ID: &str = "vehicle_id";
    pub const ROUTE_SHORT_NAME: &str = "route_short_name";
    pub const ROUTE_COLOR: &str = "route_color";
    pub const SOURCE: &str = "source";
    pub const STOPS: &str = "stops";
    pub const DETAILS_HTML: &str = "details_html";
}

/// Transport mode of a departure leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransitMode {
    Flight,
    Train,
    Tram,
    Bus,
    Metro,
}

impl TransitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitMode::Flight => "flight",
            TransitMode::Train => "train",
            TransitMode::Tram => "tram",
            TransitMode::Bus => "bus",
            TransitMode::Metro => "metro",
        }
    }

    /// Parse a query or stored value; `None` for anything outside the
    /// closed mode set.
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "flight" => Some(TransitMode::Flight),
            "train" => Some(TransitMode::Train),
            "tram" => Some(TransitMode::Tram),
            "bus" => Some(TransitMode::Bus),
            "metro" => Some(TransitMode::Metro),
            _ => None,
        }
    }
}

pub const STATUS_TAG_PREFIX: &str = "status:";

/// Lifecycle status of a leg. Each stored leg carries exactly one
/// `status:` tag at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LegStatus {
    Scheduled,
    Delayed,
    Departed,
    Canceled,
}

impl LegStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegStatus::Scheduled => "scheduled",
            LegStatus::Delayed => "delayed",
            LegStatus::Departed => "departed",
            LegStatus::Canceled => "canceled",
        }
    }

    pub fn tag(&self) -> String {
        format!("{STATUS_TAG_PREFIX}{}", self.as_str())
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.strip_prefix(STATUS_TAG_PREFIX)? {
            "scheduled" => Some(LegStatus::Scheduled),
            "delayed" => Some(LegStatus::Delayed),
            "departed" => Some(LegStatus::Departed),
            "canceled" => Some(LegStatus::Canceled),
            _ => None,
        }
    }
}

/// One stop call within a leg, embedded on the stored record as JSON so the
/// board never needs a per-leg secondary fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StopCall {
    pub stop_id: String,
    pub stop_name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    pub sequence: u32,
}

/// Source-specific extras kept only for the human-readable details line,
/// never for identity or filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegDetails {
    pub aircraft: Option<String>,
    pub baggage: Option<String>,
    pub operated_by: Option<String>,
}

impl LegDetails {
    /// Render as a small HTML fragment; `None` when there is nothing to say.
    pub fn render_html(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(aircraft) = non_empty_opt(&self.aircraft) {
            parts.push(format!("Aircraft {}", escape_html(aircraft)));
        }
        if let Some(baggage) = non_empty_opt(&self.baggage) {
            parts.push(format!("Baggage belt {}", escape_html(baggage)));
        }
        if let Some(operated_by) = non_empty_opt(&self.operated_by) {
            parts.push(format!("Operated by {}", escape_html(operated_by)));
        }
        if parts.is_empty() {
            return None;
        }
        Some(format!(
            "<span class=\"leg-details\">{}</span>",
            parts.join(" &middot; ")
        ))
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Returns `None` for empty or whitespace-only values.
pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn non_empty_opt(value: &Option<String>) -> Option<&str> {
    value.as_deref().and_then(non_empty)
}

/// "{route} to {headsign-or-destination}" used for board rows and
/// announcement notes.
pub fn leg_title(
    route: Option<&str>,
    trip_id: &str,
    headsign: &str,
    dest_name: &str,
    dest_code: &str,
) -> String {
    let route = route.and_then(non_empty).unwrap_or(trip_id);
    match [headsign, dest_name, dest_code]
        .into_iter()
        .find_map(non_empty)
    {
        Some(target) => format!("{route} to {target}"),
        None => route.to_string(),
    }
}

/// Canonical per-trip value produced by every source, consumed by the
/// ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLeg {
    pub mode: TransitMode,
    pub trip_id: String,
    pub service_date: NaiveDate,
    pub origin_code: String,
    pub origin_name: String,
    pub dest_code: String,
    pub dest_name: String,
    pub headsign: String,
    pub dep_scheduled: Option<DateTime<Utc>>,
    pub dep_estimated: Option<DateTime<Utc>>,
    pub arr_scheduled: Option<DateTime<Utc>>,
    pub arr_estimated: Option<DateTime<Utc>>,
    pub platform: Option<String>,
    pub gate: Option<String>,
    pub terminal: Option<String>,
    pub vehicle_id: Option<String>,
    pub route_short_name: Option<String>,
    pub route_color: Option<String>,
    pub source: String,
    pub stops: Vec<StopCall>,
    pub status: Option<LegStatus>,
    pub details: Option<LegDetails>,
}

impl NormalizedLeg {
    pub fn new(mode: TransitMode, trip_id: impl Into<String>, service_date: NaiveDate) -> Self {
        Self {
            mode,
            trip_id: trip_id.into(),
            service_date,
            origin_code: String::new(),
            origin_name: String::new(),
            dest_code: String::new(),
            dest_name: String::new(),
            headsign: String::new(),
            dep_scheduled: None,
            dep_estimated: None,
            arr_scheduled: None,
            arr_estimated: None,
            platform: None,
            gate: None,
            terminal: None,
            vehicle_id: None,
            route_short_name: None,
            route_color: None,
            source: String::new(),
            stops: Vec::new(),
            status: None,
            details: None,
        }
    }

    pub fn title(&self) -> String {
        leg_title(
            self.route_short_name.as_deref(),
            &self.trip_id,
            &self.headsign,
            &self.dest_name,
            &self.dest_code,
        )
    }

    /// Full attribute projection written to the record store. Every name is
    /// always present so an update overwrites stale values; absent optionals
    /// are stored as empty text.
    pub fn to_attributes(&self) -> Vec<(String, AttrValue)> {
        fn text(value: &str) -> AttrValue {
            AttrValue::text(value)
        }
        fn opt_text(value: &Option<String>) -> AttrValue {
            AttrValue::text(value.as_deref().unwrap_or_default())
        }
        fn opt_time(value: Option<DateTime<Utc>>) -> AttrValue {
            match value {
                Some(t) => AttrValue::time(t),
                None => AttrValue::text(""),
            }
        }

        let stops = serde_json::to_value(&self.stops).unwrap_or_default();
        let details_html = self
            .details
            .as_ref()
            .and_then(LegDetails::render_html)
            .unwrap_or_default();

        vec![
            (attr::MODE.into(), text(self.mode.as_str())),
            (attr::TRIP_ID.into(), text(&self.trip_id)),
            (attr::SERVICE_DATE.into(), text(&self.service_date.to_string())),
            (attr::ORIGIN_CODE.into(), text(&self.origin_code)),
            (attr::ORIGIN_NAME.into(), text(&self.origin_name)),
            (attr::DEST_CODE.into(), text(&self.dest_code)),
            (attr::DEST_NAME.into(), text(&self.dest_name)),
            (attr::HEADSIGN.into(), text(&self.headsign)),
            (attr::DEP_SCHEDULED.into(), opt_time(self.dep_scheduled)),
            (attr::DEP_ESTIMATED.into(), opt_time(self.dep_estimated)),
            (attr::ARR_SCHEDULED.into(), opt_time(self.arr_scheduled)),
            (attr::ARR_ESTIMATED.into(), opt_time(self.arr_estimated)),
            (attr::PLATFORM.into(), opt_text(&self.platform)),
            (attr::GATE.into(), opt_text(&self.gate)),
            (attr::TERMINAL.into(), opt_text(&self.terminal)),
            (attr::VEHICLE_ID.into(), opt_text(&self.vehicle_id)),
            (attr::ROUTE_SHORT_NAME.into(), opt_text(&self.route_short_name)),
            (attr::ROUTE_COLOR.into(), opt_text(&self.route_color)),
            (attr::SOURCE.into(), text(&self.source)),
            (attr::STOPS.into(), AttrValue::json(stops)),
            (attr::DETAILS_HTML.into(), text(&details_html)),
        ]
    }
}

/// Typed projection of a leg record fetched from the store.
#[derive(Debug, Clone)]
pub struct StoredLeg {
    pub id: String,
    pub mode: TransitMode,
    pub trip_id: String,
    pub service_date: NaiveDate,
    pub origin_code: String,
    pub origin_name: String,
    pub dest_code: String,
    pub dest_name: String,
    pub headsign: String,
    pub dep_scheduled: Option<DateTime<Utc>>,
    pub dep_estimated: Option<DateTime<Utc>>,
    pub arr_scheduled: Option<DateTime<Utc>>,
    pub arr_estimated: Option<DateTime<Utc>>,
    pub platform: Option<String>,
    pub gate: Option<String>,
    pub terminal: Option<String>,
    pub vehicle_id: Option<String>,
    pub route_short_name: Option<String>,
    pub route_color: Option<String>,
    pub source: String,
    pub stops: Vec<StopCall>,
    pub details_html: Option<String>,
    pub status: LegStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredLeg {
    /// Project a raw record. `None` when the natural key or mode is missing
    /// or malformed; callers skip and count such records.
    pub fn from_record(record: &LegRecord) -> Option<Self> {
        let mode = TransitMode::from_param(record.attr_text(attr::MODE)?)?;
        let trip_id = non_empty(record.attr_text(attr::TRIP_ID)?)?.to_string();
        let service_date: NaiveDate = record.attr_text(attr::SERVICE_DATE)?.parse().ok()?;
        let status = record
            .tags
            .iter()
            .find_map(|tag| LegStatus::from_tag(tag))
            .unwrap_or(LegStatus::Scheduled);
        let stops = record
            .attr_json(attr::STOPS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let owned_text =
            |name: &str| -> String { record.attr_text(name).unwrap_or_default().to_string() };
        let opt_text = |name: &str| -> Option<String> {
            record
                .attr_text(name)
                .and_then(non_empty)
                .map(str::to_string)
        };

        Some(Self {
            id: record.id.clone(),
            mode,
            trip_id,
            service_date,
            origin_code: owned_text(attr::ORIGIN_CODE),
            origin_name: owned_text(attr::ORIGIN_NAME),
            dest_code: owned_text(attr::DEST_CODE),
            dest_name: owned_text(attr::DEST_NAME),
            headsign: owned_text(attr::HEADSIGN),
            dep_scheduled: record.attr_time(attr::DEP_SCHEDULED),
            dep_estimated: record.attr_time(attr::DEP_ESTIMATED),
            arr_scheduled: record.attr_time(attr::ARR_SCHEDULED),
            arr_estimated: record.attr_time(attr::ARR_ESTIMATED),
            platform: opt_text(attr::PLATFORM),
            gate: opt_text(attr::GATE),
            terminal: opt_text(attr::TERMINAL),
            vehicle_id: opt_text(attr::VEHICLE_ID),
            route_short_name: opt_text(attr::ROUTE_SHORT_NAME),
            route_color: opt_text(attr::ROUTE_COLOR),
            source: owned_text(attr::SOURCE),
            stops,
            details_html: opt_text(attr::DETAILS_HTML),
            status,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Estimated departure when known, scheduled otherwise.
    pub fn effective_departure(&self) -> Option<DateTime<Utc>> {
        self.dep_estimated.or(self.dep_scheduled)
    }

    pub fn title(&self) -> String {
        leg_title(
            self.route_short_name.as_deref(),
            &self.trip_id,
            &self.headsign,
            &self.dest_name,
            &self.dest_code,
        )
    }

    /// `/`-split tokens of the (possibly accumulated) route name.
    pub fn route_tokens(&self) -> Vec<&str> {
        self.route_short_name
            .as_deref()
            .map(|route| {
                route
                    .split('/')
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
