//! Activity Signal — how lively the group is right now.
//!
//! Four overlapping windows (1m, 5m, 30m, 1h), each blending message density
//! with the number of distinct people talking. Short windows dominate so a
//! sudden burst registers within a minute while a long quiet stretch still
//! pulls the score down.

use super::state::MessageRecord;
use crate::clock::Timestamp;

/// (window length in seconds, weight). Weights sum to 1.0.
pub const WINDOWS: [(f64, f64); 4] = [(60.0, 0.4), (300.0, 0.3), (1800.0, 0.2), (3600.0, 0.1)];

/// Distinct speakers at which the participation term saturates.
const SENDER_DIVISOR: f64 = 10.0;

const DENSITY_SHARE: f64 = 0.6;
const SENDER_SHARE: f64 = 0.4;

fn in_window(record: &MessageRecord, now: Timestamp, window_secs: f64) -> bool {
    !record.from_bot && record.timestamp <= now && now - record.timestamp < window_secs
}

/// Human messages in the window, normalised against `saturation_per_minute`.
pub fn window_density(
    history: &[MessageRecord],
    now: Timestamp,
    window_secs: f64,
    saturation_per_minute: f64,
) -> f64 {
    let count = history
        .iter()
        .filter(|r| in_window(r, now, window_secs))
        .count() as f64;
    let saturation = saturation_per_minute * window_secs / 60.0;
    if saturation <= 0.0 {
        return 0.0;
    }
    (count / saturation).min(1.0)
}

/// Distinct human senders in the window over [`SENDER_DIVISOR`].
pub fn window_participation(history: &[MessageRecord], now: Timestamp, window_secs: f64) -> f64 {
    let mut senders: Vec<&str> = history
        .iter()
        .filter(|r| in_window(r, now, window_secs))
        .map(|r| r.sender_id.as_str())
        .collect();
    senders.sort_unstable();
    senders.dedup();
    (senders.len() as f64 / SENDER_DIVISOR).min(1.0)
}

/// Weighted activity score in [0, 1].
pub fn score(history: &[MessageRecord], now: Timestamp, saturation_per_minute: f64) -> f64 {
    WINDOWS
        .iter()
        .map(|&(secs, weight)| {
            let density = window_density(history, now, secs, saturation_per_minute);
            let participation = window_participation(history, now, secs);
            weight * (density * DENSITY_SHARE + participation * SENDER_SHARE)
        })
        .sum::<f64>()
        .clamp(0.0, 1.0)
}
