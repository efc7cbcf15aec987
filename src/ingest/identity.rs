//! Identity resolution: which stored leg does an incoming observation
//! belong to?
//!
//! The natural key is `(trip_id, service_date)`. Flight observations that
//! miss it get one more chance through the code-share heuristic: the same
//! physical departure seen under another carrier's designator still shares
//! its scheduled departure, destination and gate.

use std::sync::Arc;

use tracing::warn;

use crate::models::{attr, NormalizedLeg, StoredLeg, TransitMode};
use crate::store::{AttrValue, RecordStore, StoreResult};

pub struct IdentityResolver {
    store: Arc<dyn RecordStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Natural key first, then (flights only) the code-share heuristic.
    /// `None` means the observation is a new leg.
    pub async fn resolve(&self, leg: &NormalizedLeg) -> StoreResult<Option<StoredLeg>> {
        if let Some(found) = self.resolve_by_natural_key(leg).await? {
            return Ok(Some(found));
        }
        self.resolve_by_code_share(leg).await
    }

    async fn resolve_by_natural_key(&self, leg: &NormalizedLeg) -> StoreResult<Option<StoredLeg>> {
        let candidates = self
            .store
            .find_by_attribute(attr::TRIP_ID, &AttrValue::text(&leg.trip_id))
            .await?;
        // Store results are id-ordered, so an (unexpected) duplicate resolves
        // to the same record every time.
        Ok(candidates
            .iter()
            .filter_map(StoredLeg::from_record)
            .find(|stored| stored.service_date == leg.service_date))
    }

    async fn resolve_by_code_share(&self, leg: &NormalizedLeg) -> StoreResult<Option<StoredLeg>> {
        if leg.mode != TransitMode::Flight {
            return Ok(None);
        }
        let Some(dep_scheduled) = leg.dep_scheduled else {
            return Ok(None);
        };

        let candidates = self
            .store
            .find_by_attribute(attr::DEP_SCHEDULED, &AttrValue::time(dep_scheduled))
            .await?;
        let matches: Vec<StoredLeg> = candidates
            .iter()
            .filter_map(StoredLeg::from_record)
            .filter(|stored| {
                stored.mode == TransitMode::Flight
                    && stored.service_date == leg.service_date
                    && stored.dest_code == leg.dest_code
                    && same_gate_class(stored.gate.as_deref(), leg.gate.as_deref())
            })
            .collect();

        if matches.len() > 1 {
            warn!(
                trip_id = %leg.trip_id,
                dep_scheduled = %dep_scheduled,
                dest = %leg.dest_code,
                candidates = matches.len(),
                "Ambiguous code-share match, keeping the earliest record"
            );
        }
        Ok(matches.into_iter().next())
    }
}

/// Gates partition legs: both unset is one class, each distinct non-empty
/// gate is its own class. Two differing gates never match.
fn same_gate_class(a: Option<&str>, b: Option<&str>) -> bool {
    match (known_gate(a), known_gate(b)) {
        (None, None) => true,
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn known_gate(gate: Option<&str>) -> Option<&str> {
    gate.map(str::trim).filter(|g| !g.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 6).unwrap()
    }

    fn flight(trip_id: &str, gate: Option<&str>) -> NormalizedLeg {
        let mut leg = NormalizedLeg::new(TransitMode::Flight, trip_id, date());
        leg.dest_code = "JFK".into();
        leg.dep_scheduled = Some(Utc.with_ymd_and_hms(2025, 10, 6, 10, 0, 0).unwrap());
        leg.gate = gate.map(str::to_string);
        leg.source = "flights".into();
        leg
    }

    async fn seed(store: &dyn RecordStore, leg: &NormalizedLeg) -> String {
        let record = store
            .create_record(leg.to_attributes(), vec!["airport".into()])
            .await
            .unwrap();
        record.id
    }

    #[tokio::test]
    async fn natural_key_requires_matching_service_date() {
        let store = Arc::new(MemoryRecordStore::new());
        let stored_id = seed(store.as_ref(), &flight("AA100-2025-10-06T10:00:00Z", None)).await;
        let resolver = IdentityResolver::new(store);

        let same = flight("AA100-2025-10-06T10:00:00Z", None);
        let found = resolver.resolve(&same).await.unwrap().unwrap();
        assert_eq!(found.id, stored_id);

        let mut other_day = same.clone();
        other_day.service_date = NaiveDate::from_ymd_opt(2025, 10, 7).unwrap();
        other_day.dep_scheduled = None;
        assert!(resolver.resolve(&other_day).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn code_share_heuristic_matches_on_departure_dest_and_gate() {
        let store = Arc::new(MemoryRecordStore::new());
        let stored_id = seed(store.as_ref(), &flight("AA100-2025-10-06T10:00:00Z", Some("B23"))).await;
        let resolver = IdentityResolver::new(store);

        // Different trip id, same physical departure.
        let marketing = flight("BA900-2025-10-06T10:00:00Z", Some("B23"));
        let found = resolver.resolve(&marketing).await.unwrap().unwrap();
        assert_eq!(found.id, stored_id);
    }

    #[tokio::test]
    async fn differing_gates_block_the_heuristic() {
        let store = Arc::new(MemoryRecordStore::new());
        seed(store.as_ref(), &flight("AA100-2025-10-06T10:00:00Z", Some("B23"))).await;
        let resolver = IdentityResolver::new(store);

        let other_gate = flight("BA900-2025-10-06T10:00:00Z", Some("C4"));
        assert!(resolver.resolve(&other_gate).await.unwrap().is_none());

        let no_gate = flight("BA900-2025-10-06T10:00:00Z", None);
        assert!(resolver.resolve(&no_gate).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn both_gates_unset_share_a_class() {
        let store = Arc::new(MemoryRecordStore::new());
        let stored_id = seed(store.as_ref(), &flight("AA100-2025-10-06T10:00:00Z", None)).await;
        let resolver = IdentityResolver::new(store);

        let marketing = flight("BA900-2025-10-06T10:00:00Z", Some("  "));
        let found = resolver.resolve(&marketing).await.unwrap().unwrap();
        assert_eq!(found.id, stored_id);
    }

    #[tokio::test]
    async fn non_flight_modes_never_use_the_heuristic() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut train = NormalizedLeg::new(TransitMode::Train, "ICE-100", date());
        train.dep_scheduled = Some(Utc.with_ymd_and_hms(2025, 10, 6, 10, 0, 0).unwrap());
        seed(store.as_ref(), &train).await;
        let resolver = IdentityResolver::new(store);

        let mut other = NormalizedLeg::new(TransitMode::Train, "ICE-200", date());
        other.dep_scheduled = train.dep_scheduled;
        assert!(resolver.resolve(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ambiguity_resolves_to_the_lowest_record_id() {
        let store = Arc::new(MemoryRecordStore::new());
        let first = seed(store.as_ref(), &flight("AA100-2025-10-06T10:00:00Z", None)).await;
        let second = seed(store.as_ref(), &flight("DL200-2025-10-06T10:00:00Z", None)).await;
        let resolver = IdentityResolver::new(store);

        let marketing = flight("BA900-2025-10-06T10:00:00Z", None);
        let found = resolver.resolve(&marketing).await.unwrap().unwrap();
        assert_eq!(found.id, first.min(second));
    }
}
