//! Willingness Engine — fuses every signal into one speak / stay-quiet decision.
//!
//! score = weighted(base, activity, relevance, impression)
//!       + focus boost + immersive boost + flow + continuity + surge
//!       × observation damping
//!       − fatigue − duplicate − consecutive-streak penalties
//!
//! compared against the trigger's base threshold scaled by the frequency
//! governor. Explicit addressing skips the gate entirely unless another
//! mechanism owns the group's session slot.

use super::mode::Mode;
use super::similarity::similarity;
use super::state::{MessageRecord, SessionKind};
use crate::config::EngineConfig;
use rand::Rng;
use serde::Serialize;

const W_BASE: f64 = 0.25;
const W_ACTIVITY: f64 = 0.25;
const W_RELEVANCE: f64 = 0.20;
const W_IMPRESSION: f64 = 0.30;
const W_CONTINUITY: f64 = 0.15;
const W_SURGE: f64 = 0.10;

const DUPLICATE_WINDOW_SECS: f64 = 180.0;
const DUPLICATE_RECENT_SIMILARITY: f64 = 0.8;
const DUPLICATE_RECENT_PENALTY: f64 = 0.6;
const DUPLICATE_ANSWERED_SIMILARITY: f64 = 0.7;
const DUPLICATE_ANSWERED_PENALTY: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerKind {
    ExplicitAddress,
    AmbientMessage,
    HeartbeatProactive,
    ImmersiveFollowUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Addressed,
    AboveThreshold,
    BelowThreshold,
    /// A session owned by another mechanism holds the group.
    SessionConflict(SessionKind),
    ConsecutiveLimit,
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionReason::Addressed => write!(f, "addressed"),
            DecisionReason::AboveThreshold => write!(f, "above threshold"),
            DecisionReason::BelowThreshold => write!(f, "below threshold"),
            DecisionReason::SessionConflict(kind) => write!(f, "{:?} session active", kind),
            DecisionReason::ConsecutiveLimit => write!(f, "consecutive reply limit"),
        }
    }
}

/// Every term that went into one decision. Computed per call, never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WillingnessSample {
    pub base: f64,
    pub activity: f64,
    pub relevance: f64,
    pub impression: f64,
    /// Signed: focus/immersive boosts are positive, observation damping negative.
    pub mode_adjustment: f64,
    pub flow_contribution: f64,
    pub continuity: f64,
    pub surge: f64,
    pub fatigue_penalty: f64,
    pub duplicate_penalty: f64,
    pub streak_penalty: f64,
    pub combined: f64,
    pub threshold: f64,
    pub should_respond: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub trigger: TriggerKind,
    pub should_respond: bool,
    pub score: f64,
    pub threshold: f64,
    pub reason: DecisionReason,
    pub sample: WillingnessSample,
}

/// Signals gathered by the coordinator for one decision.
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub trigger: TriggerKind,
    pub mode: &'a Mode,
    /// Sender of the candidate message; `None` for a heartbeat on an empty room.
    pub sender_id: Option<&'a str>,
    pub activity: f64,
    pub relevance: f64,
    pub impression: f64,
    pub fatigue_penalty: f64,
    pub flow_contribution: f64,
    pub continuity: f64,
    pub duplicate_penalty: f64,
    pub surge: f64,
    pub consecutive_responses: u32,
    pub threshold_multiplier: f64,
    /// Session held by a mechanism other than the one behind `trigger`.
    pub conflicting_session: Option<SessionKind>,
}

#[derive(Debug, Clone)]
pub struct WillingnessEngine {
    base_probability: f64,
    jitter: f64,
    willingness_threshold: f64,
    heartbeat_threshold: f64,
    observation_damping: f64,
    focus_boost: f64,
    immersive_boost: f64,
    step_penalty: f64,
    max_consecutive: u32,
    air_reading_enabled: bool,
}

impl WillingnessEngine {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            base_probability: cfg.base_probability,
            jitter: cfg.base_probability_jitter,
            willingness_threshold: cfg.willingness_threshold,
            heartbeat_threshold: cfg.heartbeat_threshold,
            observation_damping: cfg.observation_damping,
            focus_boost: cfg.focus_boost,
            immersive_boost: cfg.immersive_boost,
            step_penalty: cfg.consecutive_step_penalty,
            max_consecutive: cfg.max_consecutive_responses,
            air_reading_enabled: cfg.air_reading_enabled,
        }
    }

    /// Whether a positive decision for `trigger` still needs the judgment model's say-so.
    pub fn needs_air_reading(&self, trigger: TriggerKind) -> bool {
        self.air_reading_enabled
            && matches!(
                trigger,
                TriggerKind::AmbientMessage | TriggerKind::ImmersiveFollowUp
            )
    }

    pub fn base_threshold(&self, trigger: TriggerKind) -> f64 {
        match trigger {
            TriggerKind::HeartbeatProactive => self.heartbeat_threshold,
            _ => self.willingness_threshold,
        }
    }

    fn sample_base<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.jitter > 0.0 {
            (self.base_probability + rng.gen_range(-self.jitter..=self.jitter)).clamp(0.0, 1.0)
        } else {
            self.base_probability
        }
    }

    pub fn decide<R: Rng>(&self, input: &DecisionInput<'_>, rng: &mut R) -> Decision {
        let base = self.sample_base(rng);
        let weighted = base * W_BASE
            + input.activity * W_ACTIVITY
            + input.relevance * W_RELEVANCE
            + input.impression * W_IMPRESSION;

        let mut boost = 0.0;
        if let (Mode::Focus { user_id, .. }, Some(sender)) = (input.mode, input.sender_id) {
            if user_id == sender {
                boost += self.focus_boost;
            }
        }
        if input.trigger == TriggerKind::ImmersiveFollowUp {
            boost += self.immersive_boost;
        }
        let continuity = input.continuity * W_CONTINUITY;
        let surge = if input.trigger == TriggerKind::HeartbeatProactive {
            input.surge * W_SURGE
        } else {
            0.0
        };

        let mut score = weighted + boost + input.flow_contribution + continuity + surge;
        let mut mode_adjustment = boost;
        if matches!(input.mode, Mode::Observation) {
            let damped = score * self.observation_damping;
            mode_adjustment -= score - damped;
            score = damped;
        }
        let streak_penalty = input.consecutive_responses as f64 * self.step_penalty;
        score -= input.fatigue_penalty + input.duplicate_penalty + streak_penalty;
        let score = score.clamp(0.0, 1.0);

        let threshold = (self.base_threshold(input.trigger) * input.threshold_multiplier).min(1.0);

        let (should_respond, reason) = match input.trigger {
            TriggerKind::ExplicitAddress => match input.conflicting_session {
                Some(kind) => (false, DecisionReason::SessionConflict(kind)),
                None => (true, DecisionReason::Addressed),
            },
            _ if input.consecutive_responses >= self.max_consecutive => {
                (false, DecisionReason::ConsecutiveLimit)
            }
            _ => match input.conflicting_session {
                Some(kind) => (false, DecisionReason::SessionConflict(kind)),
                None if score >= threshold => (true, DecisionReason::AboveThreshold),
                None => (false, DecisionReason::BelowThreshold),
            },
        };

        let sample = WillingnessSample {
            base,
            activity: input.activity,
            relevance: input.relevance,
            impression: input.impression,
            mode_adjustment,
            flow_contribution: input.flow_contribution,
            continuity,
            surge,
            fatigue_penalty: input.fatigue_penalty,
            duplicate_penalty: input.duplicate_penalty,
            streak_penalty,
            combined: score,
            threshold,
            should_respond,
        };

        Decision {
            trigger: input.trigger,
            should_respond,
            score,
            threshold,
            reason,
            sample,
        }
    }
}

/// Penalty for a candidate that repeats something said moments ago.
///
/// `history` holds the records before the candidate.
pub fn duplicate_penalty(candidate: &MessageRecord, history: &[MessageRecord]) -> f64 {
    let horizon = candidate.timestamp - DUPLICATE_WINDOW_SECS;

    if let Some(prev) = history.iter().rev().find(|m| !m.from_bot) {
        if prev.timestamp >= horizon
            && similarity(&candidate.text, &prev.text) > DUPLICATE_RECENT_SIMILARITY
        {
            return DUPLICATE_RECENT_PENALTY;
        }
    }

    let answered = history.windows(2).any(|pair| {
        let (asked, answer) = (&pair[0], &pair[1]);
        !asked.from_bot
            && answer.from_bot
            && asked.timestamp >= horizon
            && similarity(&candidate.text, &asked.text) > DUPLICATE_ANSWERED_SIMILARITY
    });
    if answered {
        DUPLICATE_ANSWERED_PENALTY
    } else {
        0.0
    }
}

/// How closely the candidate follows up on the bot's own last line.
pub fn continuity(candidate: &MessageRecord, history: &[MessageRecord]) -> f64 {
    history
        .iter()
        .rev()
        .find(|m| m.from_bot)
        .map(|bot| similarity(&candidate.text, &bot.text))
        .unwrap_or(0.0)
}
