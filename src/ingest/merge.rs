//! Create/update semantics for resolved legs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::status;
use crate::models::{LegStatus, NormalizedLeg, StoredLeg, TransitMode};
use crate::store::{RecordStore, StoreResult};

pub struct MergeEngine {
    store: Arc<dyn RecordStore>,
    delay_threshold_secs: u32,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn RecordStore>, delay_threshold_secs: u32) -> Self {
        Self {
            store,
            delay_threshold_secs,
        }
    }

    /// First sighting: write all attributes, tag category + status, announce.
    pub async fn create_leg(&self, leg: &NormalizedLeg, category_tag: &str) -> StoreResult<String> {
        let status = self.status_for(leg);
        let record = self
            .store
            .create_record(
                leg.to_attributes(),
                vec![category_tag.to_string(), status.tag()],
            )
            .await?;
        self.store
            .append_note(&record.id, &format!("Added to the board: {}", leg.title()))
            .await?;
        debug!(id = %record.id, trip_id = %leg.trip_id, status = status.as_str(), "Created leg");
        Ok(record.id)
    }

    /// Subsequent sighting of the same identity. Scalars are last-write-wins
    /// except the natural key, which is never rewritten; flight route names
    /// accumulate marketing designators instead of overwriting.
    pub async fn update_leg(&self, stored: &StoredLeg, leg: &NormalizedLeg) -> StoreResult<()> {
        let mut merged = leg.clone();
        merged.trip_id = stored.trip_id.clone();
        merged.service_date = stored.service_date;
        if leg.mode == TransitMode::Flight {
            merged.route_short_name = accumulate_routes(stored, leg.route_short_name.as_deref());
        }

        let old_status = stored.status;
        let new_status = self.status_for(leg);

        self.store
            .set_attributes(&stored.id, merged.to_attributes())
            .await?;

        if old_status != new_status {
            self.store.remove_tag(&stored.id, &old_status.tag()).await?;
            self.store.add_tag(&stored.id, &new_status.tag()).await?;
            if new_status == LegStatus::Delayed {
                let minutes = delay_minutes(merged.dep_scheduled, merged.dep_estimated);
                self.store
                    .append_note(&stored.id, &format!("Delayed by {minutes} min"))
                    .await?;
            }
        }

        debug!(
            id = %stored.id,
            trip_id = %stored.trip_id,
            status = new_status.as_str(),
            "Updated leg"
        );
        Ok(())
    }

    fn status_for(&self, leg: &NormalizedLeg) -> LegStatus {
        leg.status.unwrap_or_else(|| {
            status::derive(leg.dep_scheduled, leg.dep_estimated, self.delay_threshold_secs)
        })
    }
}

/// Append an unseen marketing designator to the stored `/`-joined route
/// name; an already-known designator (or none at all) keeps the stored
/// value untouched.
fn accumulate_routes(stored: &StoredLeg, incoming: Option<&str>) -> Option<String> {
    let Some(incoming) = incoming.map(str::trim).filter(|r| !r.is_empty()) else {
        return stored.route_short_name.clone();
    };
    let tokens = stored.route_tokens();
    if tokens.is_empty() {
        return Some(incoming.to_string());
    }
    if tokens.contains(&incoming) {
        return stored.route_short_name.clone();
    }
    let existing = stored.route_short_name.as_deref().unwrap_or_default();
    Some(format!("{existing} / {incoming}"))
}

fn delay_minutes(dep_scheduled: Option<DateTime<Utc>>, dep_estimated: Option<DateTime<Utc>>) -> i64 {
    match (dep_scheduled, dep_estimated) {
        (Some(scheduled), Some(estimated)) => (estimated - scheduled).num_minutes().max(0),
        _ => 0,
    }
}
