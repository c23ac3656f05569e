//! Flow Energy — conversational momentum.
//!
//! Rises each time the bot speaks (and a little when someone addresses it),
//! halves every `half_life_secs` of wall-clock time. While energy is high the
//! bot gets a small score bonus and a shorter cooldown between proactive
//! interjections.

use crate::clock::Timestamp;
use crate::config::EngineConfig;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct FlowPolicy {
    pub cap: f64,
    pub gain: f64,
    pub half_life_secs: f64,
    pub weight: f64,
    pub cooldown_shrink: f64,
    pub address_bump: f64,
}

impl From<&EngineConfig> for FlowPolicy {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            cap: cfg.flow_energy_cap,
            gain: cfg.flow_energy_gain,
            half_life_secs: cfg.flow_energy_half_life_secs,
            weight: cfg.flow_energy_weight,
            cooldown_shrink: cfg.flow_cooldown_shrink,
            address_bump: cfg.flow_address_bump,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEnergy {
    energy: f64,
    last_update: Timestamp,
}

impl FlowEnergy {
    pub fn new(now: Timestamp) -> Self {
        Self {
            energy: 0.0,
            last_update: now,
        }
    }

    /// Energy decayed to `now`. Never mutates.
    pub fn level(&self, now: Timestamp, policy: &FlowPolicy) -> f64 {
        let dt = (now - self.last_update).max(0.0);
        (self.energy * 0.5f64.powf(dt / policy.half_life_secs)).clamp(0.0, policy.cap)
    }

    fn add(&mut self, amount: f64, now: Timestamp, policy: &FlowPolicy) {
        let current = self.level(now, policy);
        self.energy = (current + amount).min(policy.cap);
        self.last_update = self.last_update.max(now);
    }

    pub fn on_reply(&mut self, now: Timestamp, policy: &FlowPolicy) {
        self.add(policy.gain, now, policy);
    }

    pub fn on_addressed(&mut self, now: Timestamp, policy: &FlowPolicy) {
        self.add(policy.address_bump, now, policy);
    }

    /// Fraction of the cap currently held.
    pub fn fill(&self, now: Timestamp, policy: &FlowPolicy) -> f64 {
        self.level(now, policy) / policy.cap
    }

    /// Bonus added to the willingness score.
    pub fn contribution(&self, now: Timestamp, policy: &FlowPolicy) -> f64 {
        policy.weight * self.fill(now, policy)
    }

    /// Cooldown after a proactive reply, shortened while in flow.
    pub fn effective_cooldown(&self, base_secs: f64, now: Timestamp, policy: &FlowPolicy) -> f64 {
        base_secs * (1.0 - policy.cooldown_shrink * self.fill(now, policy))
    }
}
