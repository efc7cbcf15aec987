//! Timing-based status derivation.

use chrono::{DateTime, Utc};

use crate::models::LegStatus;

/// Derive a status from departure timing alone. Sources with an explicit
/// status override this; the stored status tag is the cached result of the
/// last write, never recomputed at read time.
pub fn derive(
    dep_scheduled: Option<DateTime<Utc>>,
    dep_estimated: Option<DateTime<Utc>>,
    threshold_secs: u32,
) -> LegStatus {
    let (Some(scheduled), Some(estimated)) = (dep_scheduled, dep_estimated) else {
        return LegStatus::Scheduled;
    };
    if (estimated - scheduled).num_seconds() > i64::from(threshold_secs) {
        LegStatus::Delayed
    } else {
        LegStatus::Scheduled
    }
}
