//! Polling loop for the board client: a fetch task refreshing the board
//! state and a 1-second tick re-rendering countdown labels locally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use super::{BoardRow, BoardState, ClientError};
use crate::board::{BoardSnapshot, LegView};
use crate::models::TransitMode;

#[async_trait]
pub trait BoardFetcher: Send + Sync + 'static {
    async fn fetch_board(&self, mode: Option<TransitMode>) -> Result<Vec<LegView>, ClientError>;
}

/// Fetches the board over HTTP from a running service.
pub struct HttpBoardFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBoardFetcher {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BoardFetcher for HttpBoardFetcher {
    async fn fetch_board(&self, mode: Option<TransitMode>) -> Result<Vec<LegView>, ClientError> {
        let mut url = format!("{}/transit/board", self.base_url);
        if let Some(mode) = mode {
            url.push_str("?mode=");
            url.push_str(mode.as_str());
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::ApiError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }
        let snapshot: BoardSnapshot = response
            .json()
            .await
            .map_err(|e| ClientError::ApiError(format!("Invalid board payload: {e}")))?;
        Ok(snapshot.departures)
    }
}

/// One render pass: the current rows plus a countdown label per row.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub rows: Vec<BoardRow>,
    pub countdowns: Vec<String>,
}

/// Owns the fetch loop and the countdown tick. Both stop on `shutdown()`
/// or drop; no scheduled work survives teardown.
pub struct BoardPoller {
    fetch_task: JoinHandle<()>,
    tick_task: JoinHandle<()>,
}

impl BoardPoller {
    pub fn spawn(
        fetcher: Arc<dyn BoardFetcher>,
        mode: Option<TransitMode>,
        fetch_interval: Duration,
        frames: mpsc::UnboundedSender<RenderFrame>,
    ) -> Self {
        let state = Arc::new(RwLock::new(BoardState::new()));
        // Stamped at request time, so a response applies under the sequence
        // of its own request even when a later request overtakes it.
        let next_seq = AtomicU64::new(0);

        let fetch_state = state.clone();
        let fetch_frames = frames.clone();
        let fetch_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(fetch_interval);
            loop {
                interval.tick().await;
                let seq = next_seq.fetch_add(1, Ordering::SeqCst) + 1;
                match fetcher.fetch_board(mode).await {
                    Ok(legs) => {
                        let mut state = fetch_state.write().await;
                        if state.apply_snapshot(seq, legs) {
                            let _ = fetch_frames.send(render_frame(&state, Utc::now()));
                        }
                    }
                    Err(e) => {
                        warn!(seq, error = %e, "Board fetch failed");
                    }
                }
            }
        });

        let tick_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                let state = state.read().await;
                let _ = frames.send(render_frame(&state, Utc::now()));
            }
        });

        Self {
            fetch_task,
            tick_task,
        }
    }

    pub fn shutdown(&self) {
        self.fetch_task.abort();
        self.tick_task.abort();
    }
}

impl Drop for BoardPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_frame(state: &BoardState, now: DateTime<Utc>) -> RenderFrame {
    let rows = state.rows().to_vec();
    let countdowns = rows
        .iter()
        .map(|row| countdown_label(row.leg.effective_departure(), now))
        .collect();
    RenderFrame { rows, countdowns }
}

/// "now" under a minute, "N min" under an hour, the departure's `HH:MM`
/// beyond that, "--" when no departure time is known.
pub fn countdown_label(departure: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(departure) = departure else {
        return "--".to_string();
    };
    let secs = (departure - now).num_seconds();
    if secs < 60 {
        "now".to_string()
    } else if secs < 3600 {
        format!("{} min", secs / 60)
    } else {
        departure.format("%H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LegStatus;
    use chrono::TimeZone;

    struct StaticFetcher {
        legs: Vec<LegView>,
    }

    #[async_trait]
    impl BoardFetcher for StaticFetcher {
        async fn fetch_board(
            &self,
            _mode: Option<TransitMode>,
        ) -> Result<Vec<LegView>, ClientError> {
            Ok(self.legs.clone())
        }
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
    fn countdown_labels_cover_all_ranges() {
        let now = Utc.with_ymd_and_hms(2025, 10, 6, 12, 0, 0).unwrap();
        let at = |h: u32, m: u32, s: u32| Some(Utc.with_ymd_and_hms(2025, 10, 6, h, m, s).unwrap());

        assert_eq!(countdown_label(None, now), "--");
        assert_eq!(countdown_label(at(12, 0, 30), now), "now");
        assert_eq!(countdown_label(at(11, 50, 0), now), "now");
        assert_eq!(countdown_label(at(12, 5, 0), now), "5 min");
        assert_eq!(countdown_label(at(12, 59, 59), now), "59 min");
        assert_eq!(countdown_label(at(14, 30, 0), now), "14:30");
    }

    #[tokio::test]
    async fn poller_emits_frames_and_stops_on_shutdown() {
        let fetcher = Arc::new(StaticFetcher {
            legs: vec![view("a", Some(Utc::now() + chrono::Duration::minutes(5)))],
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = BoardPoller::spawn(fetcher, None, Duration::from_millis(10), tx);

        // The first frames may come from the tick before any fetch applied.
        let frame = loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if !frame.rows.is_empty() {
                break frame;
            }
        };
        assert_eq!(frame.rows.len(), 1);
        assert_eq!(frame.countdowns.len(), 1);
        assert!(!frame.rows[0].expanded);

        poller.shutdown();
        // Both tasks own the only senders; the channel closes once they stop.
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
            {
                Some(_) => continue,
                None => break,
            }
        }
    }

    #[tokio::test]
    async fn dropping_the_poller_tears_both_tasks_down() {
        let fetcher = Arc::new(StaticFetcher { legs: Vec::new() });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = BoardPoller::spawn(fetcher, None, Duration::from_millis(10), tx);
        drop(poller);

        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
            {
                Some(_) => continue,
                None => break,
            }
        }
    }
}
