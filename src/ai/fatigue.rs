//! Fatigue Tracker — penalises bursts of bot replies within a group.
//!
//! The counter sheds `decay_rate` of its value for every full hour that passes
//! and is zeroed outright every `reset_interval` hours. Decay is applied in
//! whole-hour steps carried on `last_decay`, so repeated calls at the same
//! instant (or split across the same span) land on the same value.

use crate::clock::Timestamp;
use crate::config::EngineConfig;
use serde::Serialize;

const HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Copy)]
pub struct FatiguePolicy {
    pub threshold: u32,
    /// Fraction shed per hour, in [0, 1].
    pub decay_rate: f64,
    pub reset_interval_hours: f64,
}

impl From<&EngineConfig> for FatiguePolicy {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            threshold: cfg.fatigue_threshold,
            decay_rate: cfg.fatigue_decay_rate,
            reset_interval_hours: cfg.fatigue_reset_interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FatigueTracker {
    count: f64,
    last_reply: Option<Timestamp>,
    last_decay: Timestamp,
    last_reset: Timestamp,
}

impl FatigueTracker {
    pub fn new(now: Timestamp) -> Self {
        Self {
            count: 0.0,
            last_reply: None,
            last_decay: now,
            last_reset: now,
        }
    }

    /// Current (decayed) reply count.
    pub fn level(&self) -> f64 {
        self.count
    }

    pub fn last_reply(&self) -> Option<Timestamp> {
        self.last_reply
    }

    fn decay(&mut self, now: Timestamp, policy: &FatiguePolicy) {
        let elapsed = now - self.last_decay;
        if elapsed < HOUR {
            return;
        }
        let hours = (elapsed / HOUR).floor();
        self.count = (self.count * (1.0 - policy.decay_rate).powf(hours)).max(0.0);
        self.last_decay += hours * HOUR;
    }

    pub fn record_reply(&mut self, now: Timestamp, policy: &FatiguePolicy) {
        self.maybe_reset(now, policy);
        self.decay(now, policy);
        self.count += 1.0;
        self.last_reply = Some(now);
    }

    /// 0 below the threshold, then a linear climb that reaches 1.0 after
    /// another `threshold` replies.
    pub fn penalty(&mut self, now: Timestamp, policy: &FatiguePolicy) -> f64 {
        self.maybe_reset(now, policy);
        self.decay(now, policy);
        Self::penalty_for(self.count, policy)
    }

    pub fn penalty_for(level: f64, policy: &FatiguePolicy) -> f64 {
        let threshold = policy.threshold.max(1) as f64;
        if level < threshold {
            return 0.0;
        }
        ((level - threshold + 1.0) / threshold).min(1.0)
    }

    /// Zero the counter once the reset interval has elapsed. Returns true on reset.
    pub fn maybe_reset(&mut self, now: Timestamp, policy: &FatiguePolicy) -> bool {
        if now - self.last_reset < policy.reset_interval_hours * HOUR {
            return false;
        }
        self.count = 0.0;
        self.last_reset = now;
        self.last_decay = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FatiguePolicy {
        FatiguePolicy {
            threshold: 5,
            decay_rate: 0.5,
            reset_interval_hours: 6.0,
        }
    }

    #[test]
    fn no_penalty_below_threshold() {
        let p = policy();
        let mut f = FatigueTracker::new(0.0);
        for i in 0..4 {
            f.record_reply(i as f64 * 10.0, &p);
            assert_eq!(f.penalty(i as f64 * 10.0 + 1.0, &p), 0.0);
        }
    }

    #[test]
    fn penalty_starts_at_threshold_and_rises() {
        let p = policy();
        let mut f = FatigueTracker::new(0.0);
        for i in 0..5 {
            f.record_reply(i as f64 * 10.0, &p);
        }
        let at_threshold = f.penalty(60.0, &p);
        assert!(at_threshold > 0.0, "fifth reply should start penalising");
        f.record_reply(70.0, &p);
        let above = f.penalty(80.0, &p);
        assert!(above > at_threshold, "{} should exceed {}", above, at_threshold);
        for i in 0..20 {
            f.record_reply(100.0 + i as f64, &p);
        }
        assert_eq!(f.penalty(200.0, &p), 1.0);
    }

    #[test]
    fn decay_sheds_per_full_hour() {
        let p = policy();
        let mut f = FatigueTracker::new(0.0);
        for _ in 0..8 {
            f.record_reply(0.0, &p);
        }
        f.penalty(HOUR * 0.9, &p);
        assert_eq!(f.level(), 8.0, "no decay before a full hour");
        f.penalty(HOUR * 2.0, &p);
        assert!((f.level() - 2.0).abs() < 1e-9, "two halvings: {}", f.level());
    }

    #[test]
    fn decay_is_idempotent_at_same_timestamp() {
        let p = policy();
        let mut a = FatigueTracker::new(0.0);
        let mut b = FatigueTracker::new(0.0);
        for _ in 0..6 {
            a.record_reply(0.0, &p);
            b.record_reply(0.0, &p);
        }
        a.penalty(HOUR * 1.5, &p);
        a.penalty(HOUR * 1.5, &p);
        a.penalty(HOUR * 2.5, &p);
        b.penalty(HOUR * 2.5, &p);
        assert_eq!(a, b, "split decay must match single-step decay");
    }

    #[test]
    fn reset_clears_regardless_of_decay() {
        let p = policy();
        let mut f = FatigueTracker::new(0.0);
        for _ in 0..9 {
            f.record_reply(100.0, &p);
        }
        assert!(!f.maybe_reset(HOUR * 5.9, &p));
        assert!(f.maybe_reset(HOUR * 6.0, &p));
        assert_eq!(f.level(), 0.0);
        assert!(!f.maybe_reset(HOUR * 6.0, &p), "second reset at same instant is a no-op");
    }

    #[test]
    fn decay_never_goes_negative() {
        let p = FatiguePolicy {
            decay_rate: 1.0,
            ..policy()
        };
        let mut f = FatigueTracker::new(0.0);
        f.record_reply(0.0, &p);
        f.penalty(HOUR * 3.0, &p);
        assert_eq!(f.level(), 0.0);
    }
}
