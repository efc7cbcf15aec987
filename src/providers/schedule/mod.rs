//! Batch schedule feed source.
//!
//! Downloads a columnar schedule ZIP (with conditional-request caching),
//! admits the trips departing inside the lookahead window and normalizes
//! them into departure legs.

pub mod error;
mod feed;
mod parser;

pub use error::ScheduleError;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::info;

use super::{LegSource, SourceBatch, SourceError};
use crate::config::ScheduleSyncConfig;
use feed::CachedFeed;

pub struct ScheduleSource {
    client: reqwest::Client,
    config: ScheduleSyncConfig,
    cache: Mutex<Option<CachedFeed>>,
}

impl ScheduleSource {
    pub fn new(config: ScheduleSyncConfig) -> Result<Self, ScheduleError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tafel-api/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            cache: Mutex::new(None),
        })
    }
}

#[async_trait]
impl LegSource for ScheduleSource {
    fn name(&self) -> &'static str {
        "schedule"
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<SourceBatch, SourceError> {
        // The lock also serializes downloads of one feed.
        let mut cache = self.cache.lock().await;
        if let Some(fresh) =
            feed::download_feed(&self.client, &self.config.feed_url, cache.as_ref()).await?
        {
            *cache = Some(fresh);
        }
        let Some(current) = cache.as_ref() else {
            return Err(
                ScheduleError::NetworkMessage("No feed body after download".into()).into(),
            );
        };
        let body = current.body.clone();
        drop(cache);

        let lookahead = Duration::hours(i64::from(self.config.lookahead_hours));
        let group_size = self.config.group_size;
        let parsed =
            tokio::task::spawn_blocking(move || parser::parse_feed(&body, now, lookahead, group_size))
                .await
                .map_err(ScheduleError::from)??;

        info!(
            legs = parsed.legs.len(),
            dropped = parsed.dropped,
            "Parsed schedule feed"
        );

        Ok(SourceBatch {
            legs: parsed.legs,
            dropped: parsed.dropped,
        })
    }
}
