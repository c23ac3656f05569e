//! Frequency Governor — keeps the long-run reply rate near a target.
//!
//! Tracks an exponentially-weighted reply rate (replies per hour) and turns it
//! into a threshold multiplier: at or under target the multiplier is 1.0, above
//! target it climbs linearly up to a ceiling. Because the rate itself decays
//! with wall-clock time, the multiplier relaxes back to 1.0 once the bot goes
//! quiet.
//!
//! Also keeps an hour-of-day baseline of human message volume so heartbeat
//! checks can tell a real surge from the usual evening rush.

use crate::clock::Timestamp;
use crate::config::EngineConfig;
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

const HOUR: f64 = 3600.0;
/// Smoothing for the hour-of-day buckets.
const BASELINE_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct GovernorPolicy {
    pub target_per_hour: f64,
    pub half_life_secs: f64,
    pub gain: f64,
    pub max_multiplier: f64,
}

impl From<&EngineConfig> for GovernorPolicy {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            target_per_hour: cfg.frequency_target_per_hour,
            half_life_secs: cfg.frequency_half_life_secs,
            gain: cfg.frequency_gain,
            max_multiplier: cfg.frequency_max_multiplier,
        }
    }
}

// ── Hourly baseline ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyBaseline {
    /// Smoothed human messages per hour, indexed by UTC hour of day.
    buckets: [Option<f64>; 24],
    current_hour: Option<i64>,
    current_count: f64,
}

fn hour_of_day(ts: Timestamp) -> usize {
    DateTime::<Utc>::from_timestamp(ts.floor() as i64, 0)
        .map(|d| d.hour() as usize)
        .unwrap_or(0)
}

impl HourlyBaseline {
    pub fn new() -> Self {
        Self {
            buckets: [None; 24],
            current_hour: None,
            current_count: 0.0,
        }
    }

    pub fn record_message(&mut self, now: Timestamp) {
        let key = (now / HOUR).floor() as i64;
        match self.current_hour {
            Some(current) if current == key => {}
            Some(current) if key > current => {
                self.fold(current);
                self.current_hour = Some(key);
                self.current_count = 0.0;
            }
            // out-of-order timestamps count toward the open hour
            Some(_) => {}
            None => self.current_hour = Some(key),
        }
        self.current_count += 1.0;
    }

    fn fold(&mut self, hour_key: i64) {
        let slot = hour_of_day(hour_key as f64 * HOUR);
        let observed = self.current_count;
        self.buckets[slot] = Some(match self.buckets[slot] {
            Some(prev) => prev * (1.0 - BASELINE_ALPHA) + observed * BASELINE_ALPHA,
            None => observed,
        });
    }

    /// Usual messages per minute at this hour of day, once learned.
    pub fn per_minute(&self, now: Timestamp) -> Option<f64> {
        self.buckets[hour_of_day(now)].map(|per_hour| per_hour / 60.0)
    }

    /// 0 when traffic is at or below the baseline, up to 1 at double the baseline.
    pub fn surge(&self, now: Timestamp, last_minute_count: usize) -> f64 {
        match self.per_minute(now) {
            Some(base) if base > 0.0 => (last_minute_count as f64 / base - 1.0).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

impl Default for HourlyBaseline {
    fn default() -> Self {
        Self::new()
    }
}

// ── Governor ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyGovernor {
    /// EWMA replies per hour as of `last_update`.
    rate: f64,
    last_update: Timestamp,
    decisions: u64,
    replies: u64,
    pub baseline: HourlyBaseline,
}

impl FrequencyGovernor {
    pub fn new(now: Timestamp) -> Self {
        Self {
            rate: 0.0,
            last_update: now,
            decisions: 0,
            replies: 0,
            baseline: HourlyBaseline::new(),
        }
    }

    /// Reply-rate estimate decayed to `now`, in replies per hour.
    pub fn rate(&self, now: Timestamp, policy: &GovernorPolicy) -> f64 {
        let dt = (now - self.last_update).max(0.0);
        self.rate * 0.5f64.powf(dt / policy.half_life_secs)
    }

    pub fn record_decision(&mut self, did_reply: bool, now: Timestamp, policy: &GovernorPolicy) {
        self.rate = self.rate(now, policy);
        self.last_update = self.last_update.max(now);
        self.decisions += 1;
        if did_reply {
            self.replies += 1;
            // impulse sized so a steady stream of r/hour settles at rate = r
            let tau_hours = policy.half_life_secs / std::f64::consts::LN_2 / HOUR;
            self.rate += 1.0 / tau_hours;
        }
    }

    pub fn multiplier(&self, now: Timestamp, policy: &GovernorPolicy) -> f64 {
        let over = self.rate(now, policy) / policy.target_per_hour - 1.0;
        (1.0 + policy.gain * over.max(0.0)).min(policy.max_multiplier)
    }

    /// `base` scaled by the current multiplier, capped at 1.0.
    pub fn adjusted_threshold(&self, base: f64, now: Timestamp, policy: &GovernorPolicy) -> f64 {
        (base * self.multiplier(now, policy)).min(1.0)
    }

    pub fn reply_ratio(&self) -> f64 {
        if self.decisions == 0 {
            0.0
        } else {
            self.replies as f64 / self.decisions as f64
        }
    }
}
