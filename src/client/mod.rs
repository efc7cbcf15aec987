//! Client-side board state: reconciles polled snapshots into display rows
//! while keeping UI-local state (expanded rows) stable across refreshes.

pub mod poller;

pub use poller::{countdown_label, BoardFetcher, BoardPoller, HttpBoardFetcher, RenderFrame};

use std::collections::HashMap;

use thiserror::Error;

use crate::board::LegView;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("API error: {0}")]
    ApiError(String),
}

/// One display row: a served leg plus UI-local state that never exists
/// server-side.
#[derive(Debug, Clone)]
pub struct BoardRow {
    pub leg: LegView,
    pub expanded: bool,
}

/// Reconciled board. Each applied snapshot builds a fresh row list; stale
/// responses racing a newer one are discarded by sequence number.
#[derive(Debug, Default)]
pub struct BoardState {
    rows: Vec<BoardRow>,
    last_seq: u64,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[BoardRow] {
        &self.rows
    }

    /// Apply a fetched snapshot stamped with its request-time sequence.
    /// Returns false (and changes nothing) when the snapshot is stale.
    pub fn apply_snapshot(&mut self, seq: u64, legs: Vec<LegView>) -> bool {
        if seq <= self.last_seq {
            return false;
        }

        let expanded: HashMap<&str, bool> = self
            .rows
            .iter()
            .map(|row| (row.leg.id.as_str(), row.expanded))
            .collect();
        let mut rows: Vec<BoardRow> = legs
            .into_iter()
            .map(|leg| {
                let expanded = expanded.get(leg.id.as_str()).copied().unwrap_or(false);
                BoardRow { leg, expanded }
            })
            .collect();
        // Same ordering as the server query, so a locally re-sorted board
        // always matches a fresh fetch.
        rows.sort_by_key(|row| row.leg.departure_sort_key());

        self.rows = rows;
        self.last_seq = seq;
        true
    }

    pub fn toggle_expanded(&mut self, id: &str) {
        if let Some(row) = self.rows.iter_mut().find(|row| row.leg.id == id) {
            row.expanded = !row.expanded;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LegStatus, TransitMode};
    use chrono::{DateTime, TimeZone, Utc};

    fn dep(minute: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2025, 10, 6, 12, minute, 0).unwrap())
    }

    fn view(id: &str, dep_sched_at: Option<DateTime<Utc>>) -> LegView {
        LegView {
            id: id.to_string(),
            title: id.to_string(),
            mode: TransitMode::Train,
            status: LegStatus::Scheduled,
            route: None,
            route_color: None,
            headsign: String::new(),
            platform: None,
            gate: None,
            terminal: None,
            dep_sched_at,
            dep_est_at: None,
            arr_sched_at: None,
            arr_est_at: None,
            origin: String::new(),
            origin_name: String::new(),
            dest: String::new(),
            dest_name: String::new(),
            stops: Vec::new(),
            details_html: None,
        }
    }

    #[test]
    fn stale_snapshots_never_regress_the_board() {
        let mut state = BoardState::new();
        assert!(state.apply_snapshot(2, vec![view("a", dep(10))]));

        // A slower response stamped earlier arrives late.
        assert!(!state.apply_snapshot(1, vec![view("b", dep(5))]));
        assert!(!state.apply_snapshot(2, Vec::new()));
        assert_eq!(state.rows().len(), 1);
        assert_eq!(state.rows()[0].leg.id, "a");

        assert!(state.apply_snapshot(3, vec![view("b", dep(5))]));
        assert_eq!(state.rows()[0].leg.id, "b");
    }

    #[test]
    fn expanded_rows_stay_expanded_across_refreshes() {
        let mut state = BoardState::new();
        state.apply_snapshot(1, vec![view("a", dep(10)), view("b", dep(20))]);
        state.toggle_expanded("a");

        state.apply_snapshot(2, vec![view("b", dep(20)), view("a", dep(12))]);
        let a = state.rows().iter().find(|row| row.leg.id == "a").unwrap();
        assert!(a.expanded);
        // Server fields were replaced in place.
        assert_eq!(a.leg.dep_sched_at, dep(12));
        let b = state.rows().iter().find(|row| row.leg.id == "b").unwrap();
        assert!(!b.expanded);
    }

    #[test]
    fn departed_ids_drop_and_new_ids_arrive_collapsed() {
        let mut state = BoardState::new();
        state.apply_snapshot(1, vec![view("a", dep(10))]);
        state.toggle_expanded("a");

        state.apply_snapshot(2, vec![view("c", dep(30))]);
        assert_eq!(state.rows().len(), 1);
        assert_eq!(state.rows()[0].leg.id, "c");
        assert!(!state.rows()[0].expanded);
    }

    #[test]
    fn rows_re_sort_by_effective_departure() {
        let mut state = BoardState::new();
        let mut early_but_delayed = view("a", dep(10));
        early_but_delayed.dep_est_at = dep(40);
        state.apply_snapshot(1, vec![early_but_delayed, view("b", dep(20)), view("c", None)]);

        let order: Vec<&str> = state.rows().iter().map(|row| row.leg.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn toggling_an_unknown_id_is_a_no_op() {
        let mut state = BoardState::new();
        state.apply_snapshot(1, vec![view("a", dep(10))]);
        state.toggle_expanded("ghost");
        assert!(!state.rows()[0].expanded);
    }
}
