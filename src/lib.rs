//! Unified live-departures backend: ingests a batch schedule feed and a
//! polled flight-status API, merges both into one deduplicated corpus of
//! departure legs and serves a time-windowed, per-route-fair board.

pub mod api;
pub mod board;
pub mod client;
pub mod config;
pub mod ingest;
pub mod models;
pub mod providers;
pub mod store;
pub mod sync;
pub mod times;
