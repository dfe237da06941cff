use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete classification of heartbeat recency. `sse_connected` is reported
/// separately by the registry; it never feeds into this formula.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkQuality {
    Excellent,
    Good,
    Poor,
    Offline,
}

impl LinkQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Offline => "offline",
        }
    }
}

/// Whole heartbeat intervals elapsed since the device was last seen.
/// `None` means never seen (or a zero interval, which cannot be classified).
/// A `last_seen` in the future clamps to zero missed.
pub fn missed_heartbeats(
    now: DateTime<Utc>,
    last_seen: Option<DateTime<Utc>>,
    interval_secs: u32,
) -> Option<u64> {
    let last_seen = last_seen?;
    if interval_secs == 0 {
        return None;
    }
    let elapsed = (now - last_seen).num_seconds().max(0) as u64;
    Some(elapsed / u64::from(interval_secs))
}

pub fn classify(missed: Option<u64>) -> LinkQuality {
    match missed {
        Some(0) => LinkQuality::Excellent,
        Some(1) => LinkQuality::Good,
        Some(2) => LinkQuality::Poor,
        _ => LinkQuality::Offline,
    }
}
