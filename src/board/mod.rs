//! Board read model: category-restricted queries shaped by fairness caps,
//! a freshness window and effective-departure ordering.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::config::{BoardConfig, WindowMode};
use crate::models::{LegStatus, StopCall, StoredLeg, TransitMode};
use crate::store::{RecordStore, StoreResult};
use crate::times::{in_absolute_window, in_time_of_day_window};

/// Hours either side of now kept on the board in absolute window mode.
const ABSOLUTE_WINDOW_HOURS: i64 = 24;

/// Wire shape of the board endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BoardSnapshot {
    pub departures: Vec<LegView>,
}

/// One serialized board row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LegView {
    pub id: String,
    pub title: String,
    pub mode: TransitMode,
    pub status: LegStatus,
    pub route: Option<String>,
    pub route_color: Option<String>,
    pub headsign: String,
    pub platform: Option<String>,
    pub gate: Option<String>,
    pub terminal: Option<String>,
    pub dep_sched_at: Option<DateTime<Utc>>,
    pub dep_est_at: Option<DateTime<Utc>>,
    pub arr_sched_at: Option<DateTime<Utc>>,
    pub arr_est_at: Option<DateTime<Utc>>,
    pub origin: String,
    pub origin_name: String,
    pub dest: String,
    pub dest_name: String,
    pub stops: Vec<StopCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details_html: Option<String>,
}

impl LegView {
    pub fn effective_departure(&self) -> Option<DateTime<Utc>> {
        self.dep_est_at.or(self.dep_sched_at)
    }

    /// Ascending effective-departure order, rows without any departure time
    /// last. The client reconciler sorts with the same key.
    pub fn departure_sort_key(&self) -> (bool, Option<DateTime<Utc>>) {
        let departure = self.effective_departure();
        (departure.is_none(), departure)
    }
}

impl From<StoredLeg> for LegView {
    fn from(leg: StoredLeg) -> Self {
        let title = leg.title();
        Self {
            id: leg.id,
            title,
            mode: leg.mode,
            status: leg.status,
            route: leg.route_short_name,
            route_color: leg.route_color,
            headsign: leg.headsign,
            platform: leg.platform,
            gate: leg.gate,
            terminal: leg.terminal,
            dep_sched_at: leg.dep_scheduled,
            dep_est_at: leg.dep_estimated,
            arr_sched_at: leg.arr_scheduled,
            arr_est_at: leg.arr_estimated,
            origin: leg.origin_code,
            origin_name: leg.origin_name,
            dest: leg.dest_code,
            dest_name: leg.dest_name,
            stops: leg.stops,
            details_html: leg.details_html,
        }
    }
}

pub struct BoardQuery {
    store: Arc<dyn RecordStore>,
    config: BoardConfig,
    mode_categories: HashMap<TransitMode, String>,
}

impl BoardQuery {
    pub fn new(
        store: Arc<dyn RecordStore>,
        config: BoardConfig,
        mode_categories: HashMap<TransitMode, String>,
    ) -> Self {
        Self {
            store,
            config,
            mode_categories,
        }
    }

    /// Assemble the board: restrict to the category partition(s), project,
    /// filter by mode, cap, window, sort.
    pub async fn query(
        &self,
        mode_filter: Option<TransitMode>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<LegView>> {
        let categories: BTreeSet<String> = match mode_filter {
            Some(mode) => match self.mode_categories.get(&mode) {
                Some(category) => BTreeSet::from([category.clone()]),
                None => {
                    warn!(
                        mode = mode.as_str(),
                        "No board category configured for mode, serving an empty board"
                    );
                    return Ok(Vec::new());
                }
            },
            None => self.mode_categories.values().cloned().collect(),
        };

        let mut records = Vec::new();
        for category in &categories {
            records.extend(self.store.find_by_tag(category).await?);
        }

        let mut malformed = 0usize;
        let mut legs: Vec<StoredLeg> = records
            .iter()
            .filter_map(|record| {
                let leg = StoredLeg::from_record(record);
                if leg.is_none() {
                    malformed += 1;
                }
                leg
            })
            .collect();
        if malformed > 0 {
            warn!(skipped = malformed, "Skipping malformed leg records");
        }

        if let Some(mode) = mode_filter {
            legs.retain(|leg| leg.mode == mode);
        }

        let legs = self.apply_caps(mode_filter, legs);

        let mut views: Vec<LegView> = legs
            .into_iter()
            .filter(|leg| self.in_window(leg, now))
            .map(LegView::from)
            .collect();
        views.sort_by_key(LegView::departure_sort_key);
        Ok(views)
    }

    /// High-frequency modes get a per-route cap so one dense line cannot
    /// push every other route off the board; everything else gets a flat cap.
    fn apply_caps(
        &self,
        mode_filter: Option<TransitMode>,
        mut legs: Vec<StoredLeg>,
    ) -> Vec<StoredLeg> {
        let fairness =
            mode_filter.is_some_and(|mode| self.config.fairness_modes.contains(&mode));
        if !fairness {
            legs.sort_by_key(scheduled_sort_key);
            legs.truncate(self.config.flat_cap);
            return legs;
        }

        let mut groups: BTreeMap<String, Vec<StoredLeg>> = BTreeMap::new();
        for leg in legs {
            groups
                .entry(leg.route_short_name.clone().unwrap_or_default())
                .or_default()
                .push(leg);
        }
        let mut capped = Vec::new();
        for (_, mut group) in groups {
            group.sort_by_key(scheduled_sort_key);
            group.truncate(self.config.per_route_cap);
            capped.extend(group);
        }
        capped
    }

    fn in_window(&self, leg: &StoredLeg, now: DateTime<Utc>) -> bool {
        let Some(departure) = leg.effective_departure() else {
            return false;
        };
        match self.config.window {
            WindowMode::Absolute => in_absolute_window(
                departure,
                now - Duration::hours(ABSOLUTE_WINDOW_HOURS),
                now + Duration::hours(ABSOLUTE_WINDOW_HOURS),
            ),
            WindowMode::TimeOfDay => {
                in_time_of_day_window(departure, now, i64::from(self.config.window_minutes))
            }
        }
    }
}

fn scheduled_sort_key(leg: &StoredLeg) -> (bool, Option<DateTime<Utc>>) {
    (leg.dep_scheduled.is_none(), leg.dep_scheduled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedLeg;
    use crate::store::{AttrValue, MemoryRecordStore};
    use chrono::{NaiveDate, TimeZone};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 6).unwrap()
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, day, hour, minute, 0).unwrap()
    }

    fn categories() -> HashMap<TransitMode, String> {
        HashMap::from([
            (TransitMode::Flight, "airport".to_string()),
            (TransitMode::Train, "rail".to_string()),
            (TransitMode::Metro, "urban".to_string()),
            (TransitMode::Tram, "urban".to_string()),
            (TransitMode::Bus, "urban".to_string()),
        ])
    }

    fn leg(
        mode: TransitMode,
        trip_id: &str,
        route: &str,
        dep_scheduled: Option<DateTime<Utc>>,
    ) -> NormalizedLeg {
        let mut leg = NormalizedLeg::new(mode, trip_id, date());
        leg.route_short_name = Some(route.to_string());
        leg.dep_scheduled = dep_scheduled;
        leg
    }

    async fn seed(store: &MemoryRecordStore, leg: &NormalizedLeg, category: &str) {
        store
            .create_record(
                leg.to_attributes(),
                vec![category.to_string(), "status:scheduled".to_string()],
            )
            .await
            .unwrap();
    }

    fn board(store: Arc<MemoryRecordStore>, config: BoardConfig) -> BoardQuery {
        BoardQuery::new(store, config, categories())
    }

    #[tokio::test]
    async fn unfiltered_board_unions_all_categories() {
        let store = Arc::new(MemoryRecordStore::new());
        seed(&store, &leg(TransitMode::Flight, "AA100", "AA100", Some(at(6, 13, 0))), "airport").await;
        seed(&store, &leg(TransitMode::Train, "ICE-100", "ICE 100", Some(at(6, 12, 30))), "rail").await;
        let board = board(store, BoardConfig::default());

        let views = board.query(None, at(6, 12, 0)).await.unwrap();
        assert_eq!(views.len(), 2);
        // Sorted by effective departure.
        assert_eq!(views[0].mode, TransitMode::Train);
        assert_eq!(views[1].mode, TransitMode::Flight);
    }

    #[tokio::test]
    async fn mode_filter_keeps_only_that_mode() {
        let store = Arc::new(MemoryRecordStore::new());
        seed(&store, &leg(TransitMode::Flight, "AA100", "AA100", Some(at(6, 13, 0))), "airport").await;
        seed(&store, &leg(TransitMode::Train, "ICE-100", "ICE 100", Some(at(6, 12, 30))), "rail").await;
        let board = board(store, BoardConfig::default());

        let views = board.query(Some(TransitMode::Train), at(6, 12, 0)).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].route.as_deref(), Some("ICE 100"));
    }

    #[tokio::test]
    async fn unmapped_mode_serves_an_empty_board() {
        let store = Arc::new(MemoryRecordStore::new());
        seed(&store, &leg(TransitMode::Train, "ICE-100", "ICE 100", Some(at(6, 12, 30))), "rail").await;
        let query = BoardQuery::new(
            store,
            BoardConfig::default(),
            HashMap::from([(TransitMode::Train, "rail".to_string())]),
        );

        let views = query.query(Some(TransitMode::Flight), at(6, 12, 0)).await.unwrap();
        assert!(views.is_empty());
    }

    #[tokio::test]
    async fn fairness_caps_each_route_at_k_soonest() {
        let store = Arc::new(MemoryRecordStore::new());
        for minute in [40, 10, 30, 20] {
            seed(
                &store,
                &leg(TransitMode::Metro, &format!("U1-{minute}"), "U1", Some(at(6, 12, minute))),
                "urban",
            )
            .await;
        }
        seed(&store, &leg(TransitMode::Metro, "U2-50", "U2", Some(at(6, 12, 50))), "urban").await;
        let config = BoardConfig {
            per_route_cap: 2,
            ..BoardConfig::default()
        };
        let board = board(store, config);

        let views = board.query(Some(TransitMode::Metro), at(6, 12, 0)).await.unwrap();
        let u1: Vec<&LegView> = views.iter().filter(|v| v.route.as_deref() == Some("U1")).collect();
        assert_eq!(u1.len(), 2);
        assert_eq!(u1[0].dep_sched_at, Some(at(6, 12, 10)));
        assert_eq!(u1[1].dep_sched_at, Some(at(6, 12, 20)));
        // The sparse route keeps its slot.
        assert_eq!(
            views.iter().filter(|v| v.route.as_deref() == Some("U2")).count(),
            1
        );
    }

    #[tokio::test]
    async fn flat_cap_keeps_the_soonest_scheduled() {
        let store = Arc::new(MemoryRecordStore::new());
        for (trip, minute) in [("ICE-1", 30u32), ("ICE-2", 10), ("ICE-3", 20)] {
            seed(&store, &leg(TransitMode::Train, trip, trip, Some(at(6, 12, minute))), "rail").await;
        }
        let config = BoardConfig {
            flat_cap: 2,
            ..BoardConfig::default()
        };
        let board = board(store, config);

        let views = board.query(Some(TransitMode::Train), at(6, 12, 0)).await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].dep_sched_at, Some(at(6, 12, 10)));
        assert_eq!(views[1].dep_sched_at, Some(at(6, 12, 20)));
    }

    #[tokio::test]
    async fn absolute_window_excludes_stale_and_distant_legs() {
        let store = Arc::new(MemoryRecordStore::new());
        seed(&store, &leg(TransitMode::Train, "past", "A", Some(at(5, 11, 0))), "rail").await;
        seed(&store, &leg(TransitMode::Train, "recent", "B", Some(at(6, 11, 0))), "rail").await;
        seed(&store, &leg(TransitMode::Train, "far", "C", Some(at(7, 13, 0))), "rail").await;
        seed(&store, &leg(TransitMode::Train, "untimed", "D", None), "rail").await;
        let board = board(store, BoardConfig::default());

        let views = board.query(Some(TransitMode::Train), at(6, 12, 0)).await.unwrap();
        let trips: Vec<&str> = views.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(trips, vec!["B"]);
    }

    #[tokio::test]
    async fn time_of_day_window_wraps_past_midnight() {
        let store = Arc::new(MemoryRecordStore::new());
        // 00:10 is 12 minutes ahead of 23:58; 01:10 is 72 minutes ahead.
        seed(&store, &leg(TransitMode::Train, "wrap", "A", Some(at(7, 0, 10))), "rail").await;
        seed(&store, &leg(TransitMode::Train, "late", "B", Some(at(7, 1, 10))), "rail").await;
        let config = BoardConfig {
            window: WindowMode::TimeOfDay,
            window_minutes: 30,
            ..BoardConfig::default()
        };
        let board = board(store, config);

        let views = board.query(Some(TransitMode::Train), at(6, 23, 58)).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].title, "A");
    }

    #[tokio::test]
    async fn estimates_reorder_the_board() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut delayed = leg(TransitMode::Train, "ICE-1", "ICE 1", Some(at(6, 12, 10)));
        delayed.dep_estimated = Some(at(6, 12, 45));
        seed(&store, &delayed, "rail").await;
        seed(&store, &leg(TransitMode::Train, "ICE-2", "ICE 2", Some(at(6, 12, 20))), "rail").await;
        let board = board(store, BoardConfig::default());

        let views = board.query(Some(TransitMode::Train), at(6, 12, 0)).await.unwrap();
        assert_eq!(views[0].route.as_deref(), Some("ICE 2"));
        assert_eq!(views[1].route.as_deref(), Some("ICE 1"));
        assert_eq!(views[1].effective_departure(), Some(at(6, 12, 45)));
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_not_fatal() {
        let store = Arc::new(MemoryRecordStore::new());
        store
            .create_record(
                vec![("mode".to_string(), AttrValue::text("train"))],
                vec!["rail".to_string()],
            )
            .await
            .unwrap();
        seed(&store, &leg(TransitMode::Train, "ICE-1", "ICE 1", Some(at(6, 12, 10))), "rail").await;
        let board = board(store, BoardConfig::default());

        let views = board.query(Some(TransitMode::Train), at(6, 12, 0)).await.unwrap();
        assert_eq!(views.len(), 1);
    }

    #[test]
    fn details_html_is_omitted_when_absent() {
        let mut source = leg(TransitMode::Train, "ICE-1", "ICE 1", Some(at(6, 12, 10)));
        source.headsign = "Berlin Hbf".into();
        let record_like = LegView {
            id: "x".into(),
            title: source.title(),
            mode: TransitMode::Train,
            status: LegStatus::Scheduled,
            route: source.route_short_name.clone(),
            route_color: None,
            headsign: source.headsign.clone(),
            platform: None,
            gate: None,
            terminal: None,
            dep_sched_at: source.dep_scheduled,
            dep_est_at: None,
            arr_sched_at: None,
            arr_est_at: None,
            origin: String::new(),
            origin_name: String::new(),
            dest: String::new(),
            dest_name: String::new(),
            stops: Vec::new(),
            details_html: None,
        };
        let json = serde_json::to_value(&record_like).unwrap();
        assert!(json.get("details_html").is_none());
        assert_eq!(json["title"], "ICE 1 to Berlin Hbf");
        assert_eq!(json["status"], "scheduled");
    }
}
