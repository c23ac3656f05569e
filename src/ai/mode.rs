//! Mode Controller — the bot's engagement posture in one group.
//!
//! Observation → Normal when the room wakes up, Normal → Observation when it
//! goes quiet, Normal → Focus(user) when one person clearly has the bot's
//! attention. Focus ends on its own deadline, when its response budget runs
//! out, or when someone else takes over the conversation.

use crate::clock::Timestamp;
use crate::config::EngineConfig;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Mode {
    Observation,
    Normal,
    Focus {
        user_id: String,
        deadline: Timestamp,
        remaining_responses: u32,
    },
}

impl Mode {
    pub fn name(&self) -> ModeName {
        match self {
            Mode::Observation => ModeName::Observation,
            Mode::Normal => ModeName::Normal,
            Mode::Focus { .. } => ModeName::Focus,
        }
    }

    pub fn focused_user(&self) -> Option<&str> {
        match self {
            Mode::Focus { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeName {
    Observation,
    Normal,
    Focus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeTransition {
    pub from: ModeName,
    pub to: ModeName,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ModePolicy {
    pub enter_threshold: f64,
    pub exit_threshold: f64,
    pub focus_enabled: bool,
    pub min_interest: f64,
    pub focus_timeout_secs: f64,
    pub focus_max_responses: u32,
    pub focus_fatigue_ceiling: f64,
}

impl From<&EngineConfig> for ModePolicy {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            enter_threshold: cfg.observation_mode_threshold,
            exit_threshold: cfg.observation_exit(),
            focus_enabled: cfg.focus_chat_enabled,
            min_interest: cfg.min_interest_score,
            focus_timeout_secs: cfg.focus_timeout_seconds as f64,
            focus_max_responses: cfg.focus_max_responses,
            focus_fatigue_ceiling: cfg.focus_fatigue_ceiling,
        }
    }
}

/// Interest estimate for the sender of the message being evaluated.
#[derive(Debug, Clone)]
pub struct InterestSample {
    pub user_id: String,
    pub interest: f64,
}

#[derive(Debug, Clone)]
pub struct ModeInput {
    pub now: Timestamp,
    pub activity: f64,
    pub fatigue_penalty: f64,
    /// `None` on heartbeat ticks.
    pub candidate: Option<InterestSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeController {
    mode: Mode,
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeController {
    pub fn new() -> Self {
        Self {
            mode: Mode::Observation,
        }
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    fn transition(&mut self, to: Mode, reason: &'static str) -> Option<ModeTransition> {
        let from = self.mode.name();
        let to_name = to.name();
        self.mode = to;
        Some(ModeTransition {
            from,
            to: to_name,
            reason,
        })
    }

    /// Re-evaluate after a message or heartbeat. At most one transition per call.
    pub fn evaluate(&mut self, input: &ModeInput, policy: &ModePolicy) -> Option<ModeTransition> {
        match &mut self.mode {
            Mode::Observation => {
                if input.activity > policy.enter_threshold {
                    return self.transition(Mode::Normal, "activity rose");
                }
                None
            }
            Mode::Normal => {
                if input.activity < policy.exit_threshold {
                    return self.transition(Mode::Observation, "activity fell");
                }
                let candidate = input.candidate.as_ref()?;
                if policy.focus_enabled
                    && candidate.interest > policy.min_interest
                    && input.fatigue_penalty <= policy.focus_fatigue_ceiling
                {
                    return self.transition(
                        Mode::Focus {
                            user_id: candidate.user_id.clone(),
                            deadline: input.now + policy.focus_timeout_secs,
                            remaining_responses: policy.focus_max_responses,
                        },
                        "interest above minimum",
                    );
                }
                None
            }
            Mode::Focus {
                user_id,
                deadline,
                remaining_responses,
            } => {
                if input.now > *deadline {
                    return self.transition(Mode::Normal, "focus timed out");
                }
                if *remaining_responses == 0 {
                    return self.transition(Mode::Normal, "focus budget exhausted");
                }
                let candidate = input.candidate.as_ref()?;
                if candidate.user_id == *user_id {
                    if candidate.interest < policy.min_interest {
                        return self.transition(Mode::Normal, "interest dropped");
                    }
                    *deadline = input.now + policy.focus_timeout_secs;
                    None
                } else if candidate.interest > policy.min_interest {
                    self.transition(Mode::Normal, "another user took over")
                } else {
                    None
                }
            }
        }
    }

    /// Count a reply against the focus budget.
    pub fn record_response(&mut self) -> Option<ModeTransition> {
        if let Mode::Focus {
            remaining_responses,
            ..
        } = &mut self.mode
        {
            *remaining_responses = remaining_responses.saturating_sub(1);
            if *remaining_responses == 0 {
                return self.transition(Mode::Normal, "focus budget exhausted");
            }
        }
        None
    }
}
