//! Session Coordinator — the single entry point for group events.
//!
//! Owns one [`GroupConversationState`] per group behind its own async mutex, so
//! messages and heartbeat ticks for a group are applied strictly in arrival
//! order while different groups proceed in parallel. The lock is held across
//! the judgment and dispatch calls: a heartbeat can never slip in between a
//! decision and its commit.

use super::activity;
use super::fatigue::FatiguePolicy;
use super::flow::FlowPolicy;
use super::frequency::GovernorPolicy;
use super::mode::{InterestSample, Mode, ModeInput, ModeName, ModePolicy};
use super::relevance;
use super::state::{DecisionRecord, GroupConversationState, MessageRecord, SessionKind};
use super::willingness::{
    continuity, duplicate_penalty, Decision, DecisionInput, DecisionReason, TriggerKind,
    WillingnessEngine,
};
use crate::clock::{Clock, Timestamp};
use crate::config::EngineConfig;
use crate::error::{DeliveryError, EngineError, EngineResult};
use crate::host::{GroupFilter, ImpressionStore, ReplyDispatcher};
use crate::llm::{infer_with_timeout, Judgment, JudgmentProvider, PromptKind};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};

/// Lines of history handed to the judgment model.
const JUDGMENT_CONTEXT_LINES: usize = 20;
/// Impression assumed when nobody has spoken yet.
const NEUTRAL_IMPRESSION: f64 = 0.5;

// ── Events & outcomes ──────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub group_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub has_attachment: bool,
    pub timestamp: Timestamp,
    /// Resolved by the host: @-mention or name pattern aimed at the bot.
    pub addressed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    Message(InboundMessage),
    HeartbeatTick { group_id: String },
    /// The proactive watch window may have closed.
    WatchDeadline { group_id: String },
}

impl GroupEvent {
    pub fn group_id(&self) -> &str {
        match self {
            GroupEvent::Message(m) => &m.group_id,
            GroupEvent::HeartbeatTick { group_id } | GroupEvent::WatchDeadline { group_id } => {
                group_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclineReason {
    /// The willingness gate said no.
    Gate(DecisionReason),
    /// The judgment model vetoed or closed the topic.
    ModelVeto,
    CollaboratorTimeout,
    InferenceFailed,
    /// The session this reply belonged to ended while the model was thinking.
    StaleSession,
    /// Proactive watch elapsed with nothing said.
    NothingCollected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    IneligibleGroup,
    UnknownGroup,
    Command,
    Cooldown,
    SessionActive,
    Observation,
    Evicted,
    /// The watch was renewed or closed before its old deadline fired.
    WatchNotDue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Replied {
        trigger: TriggerKind,
        text: String,
        score: f64,
        session: Option<SessionKind>,
    },
    Declined {
        trigger: TriggerKind,
        score: f64,
        reason: DeclineReason,
    },
    /// Message buffered by an active proactive watch, evaluated at `deadline`.
    Collected { deadline: Timestamp },
    Skipped(SkipReason),
    /// An overdue watch was settled before the message that arrived after it.
    WatchSettled {
        watch: Box<Outcome>,
        message: Box<Outcome>,
    },
}

impl Outcome {
    /// What happened to the event itself, past any watch settled on the way.
    pub fn event(&self) -> &Outcome {
        match self {
            Outcome::WatchSettled { message, .. } => message.event(),
            other => other,
        }
    }

    /// Replies posted while handling the event.
    pub fn replies(&self) -> usize {
        match self {
            Outcome::Replied { .. } => 1,
            Outcome::WatchSettled { watch, message } => watch.replies() + message.replies(),
            _ => 0,
        }
    }
}

// ── Status ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeReport {
    pub name: ModeName,
    pub focus_user: Option<String>,
    pub focus_seconds_left: Option<f64>,
    pub focus_remaining_responses: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub kind: SessionKind,
    pub seconds_left: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateReport {
    pub group_id: String,
    pub mode: ModeReport,
    pub fatigue_level: f64,
    pub fatigue_penalty: f64,
    pub flow_energy: f64,
    pub frequency_multiplier: f64,
    pub consecutive_responses: u32,
    pub cooldown_remaining: f64,
    pub active_session: Option<SessionReport>,
    pub last_decision: Option<DecisionRecord>,
    pub message_count: usize,
}

// ── Coordinator ────────────────────────────────────────

#[derive(Clone)]
pub struct Collaborators {
    pub judge: Arc<dyn JudgmentProvider>,
    pub dispatcher: Arc<dyn ReplyDispatcher>,
    pub impressions: Arc<dyn ImpressionStore>,
    pub filter: Arc<dyn GroupFilter>,
}

struct Policies {
    fatigue: FatiguePolicy,
    governor: GovernorPolicy,
    flow: FlowPolicy,
    mode: ModePolicy,
}

pub struct SessionCoordinator {
    config: Arc<EngineConfig>,
    engine: WillingnessEngine,
    policies: Policies,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
    groups: RwLock<HashMap<String, Arc<Mutex<GroupConversationState>>>>,
}

impl SessionCoordinator {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
    ) -> EngineResult<Self> {
        config.validate()?;
        let policies = Policies {
            fatigue: FatiguePolicy::from(&config),
            governor: GovernorPolicy::from(&config),
            flow: FlowPolicy::from(&config),
            mode: ModePolicy::from(&config),
        };
        Ok(Self {
            engine: WillingnessEngine::new(&config),
            config: Arc::new(config),
            policies,
            clock,
            collaborators,
            groups: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub async fn group_ids(&self) -> Vec<String> {
        self.groups.read().await.keys().cloned().collect()
    }

    async fn group(&self, group_id: &str) -> Option<Arc<Mutex<GroupConversationState>>> {
        self.groups.read().await.get(group_id).cloned()
    }

    async fn group_or_create(&self, group_id: &str) -> Arc<Mutex<GroupConversationState>> {
        if let Some(existing) = self.group(group_id).await {
            return existing;
        }
        let mut groups = self.groups.write().await;
        groups
            .entry(group_id.to_string())
            .or_insert_with(|| {
                tracing::info!(group_id, "tracking new group");
                Arc::new(Mutex::new(GroupConversationState::new(
                    group_id,
                    &self.config,
                    self.clock.now(),
                )))
            })
            .clone()
    }

    /// Receiver for the group's proactive watch deadline. `None` for unknown groups.
    pub async fn watch_deadlines(
        &self,
        group_id: &str,
    ) -> Option<watch::Receiver<Option<Timestamp>>> {
        let group = self.group(group_id).await?;
        let state = group.lock().await;
        Some(state.subscribe_watch_deadline())
    }

    /// Remove the group if nobody has spoken within the eviction window.
    /// A group someone else holds a handle to is in use and stays.
    pub(crate) async fn evict_if_idle(&self, group_id: &str) -> bool {
        let mut groups = self.groups.write().await;
        let Some(group) = groups.get(group_id) else {
            return false;
        };
        if Arc::strong_count(group) > 1 {
            return false;
        }
        let idle = match group.try_lock() {
            Ok(state) => {
                self.clock.now() - state.last_human_at > self.config.group_idle_eviction_secs as f64
            }
            Err(_) => false,
        };
        if idle {
            groups.remove(group_id);
            tracing::info!(group_id, "evicting idle group");
        }
        idle
    }

    /// Drop a group's state. Returns false if it was not tracked.
    pub async fn remove_group(&self, group_id: &str) -> bool {
        let removed = self.groups.write().await.remove(group_id).is_some();
        if removed {
            tracing::info!(group_id, "group removed");
        }
        removed
    }

    /// End every active session. Used on shutdown.
    pub async fn clear_sessions(&self) {
        let groups: Vec<_> = self.groups.read().await.values().cloned().collect();
        for group in groups {
            group.lock().await.end_session("shutdown");
        }
    }

    /// Single entry point for everything that happens in a group.
    pub async fn on_event(&self, event: GroupEvent) -> EngineResult<Outcome> {
        if !self
            .collaborators
            .filter
            .is_group_eligible(event.group_id())
        {
            tracing::debug!(group_id = %event.group_id(), "ignoring ineligible group");
            return Ok(Outcome::Skipped(SkipReason::IneligibleGroup));
        }
        match event {
            GroupEvent::Message(message) => {
                let group = self.group_or_create(&message.group_id).await;
                let mut state = group.lock().await;
                self.handle_message(&mut state, message).await
            }
            GroupEvent::HeartbeatTick { group_id } => {
                if self.evict_if_idle(&group_id).await {
                    return Ok(Outcome::Skipped(SkipReason::Evicted));
                }
                let Some(group) = self.group(&group_id).await else {
                    return Ok(Outcome::Skipped(SkipReason::UnknownGroup));
                };
                let mut state = group.lock().await;
                self.handle_tick(&mut state).await
            }
            GroupEvent::WatchDeadline { group_id } => {
                let Some(group) = self.group(&group_id).await else {
                    return Ok(Outcome::Skipped(SkipReason::UnknownGroup));
                };
                let mut state = group.lock().await;
                let now = self.clock.now();
                if !state.watch_due(now) {
                    return Ok(Outcome::Skipped(SkipReason::WatchNotDue));
                }
                self.resolve_watch(&mut state, now).await
            }
        }
    }

    /// Snapshot for the status command.
    pub async fn describe_state(&self, group_id: &str) -> Option<StateReport> {
        let group = self.group(group_id).await?;
        let state = group.lock().await;
        let now = self.clock.now();

        let mode = match state.mode.mode() {
            Mode::Focus {
                user_id,
                deadline,
                remaining_responses,
            } => ModeReport {
                name: ModeName::Focus,
                focus_user: Some(user_id.clone()),
                focus_seconds_left: Some((deadline - now).max(0.0)),
                focus_remaining_responses: Some(*remaining_responses),
            },
            other => ModeReport {
                name: other.name(),
                focus_user: None,
                focus_seconds_left: None,
                focus_remaining_responses: None,
            },
        };

        // decay on a copy so the query never mutates
        let mut fatigue = state.fatigue.clone();
        let fatigue_penalty = fatigue.penalty(now, &self.policies.fatigue);

        Some(StateReport {
            group_id: state.group_id.clone(),
            mode,
            fatigue_level: fatigue.level(),
            fatigue_penalty,
            flow_energy: state.flow.level(now, &self.policies.flow),
            frequency_multiplier: state.governor.multiplier(now, &self.policies.governor),
            consecutive_responses: state.consecutive_responses,
            cooldown_remaining: (state.cooldown_until - now).max(0.0),
            active_session: state.session.kind().zip(state.session.deadline()).map(
                |(kind, deadline)| SessionReport {
                    kind,
                    seconds_left: (deadline - now).max(0.0),
                },
            ),
            last_decision: state.last_decision.clone(),
            message_count: state.history.len(),
        })
    }

    // ── Message path ───────────────────────────────────

    fn is_command(&self, text: &str) -> bool {
        let trimmed = text.trim_start();
        self.config
            .command_prefixes
            .iter()
            .any(|p| !p.is_empty() && trimmed.starts_with(p.as_str()))
    }

    async fn handle_message(
        &self,
        state: &mut GroupConversationState,
        message: InboundMessage,
    ) -> EngineResult<Outcome> {
        let now = self.clock.now();
        if !state.watch_due(now) {
            return self.evaluate_message(state, message, now).await;
        }

        // a watch whose window closed before this message is settled first
        let watch = match self.resolve_watch(state, now).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if !self.is_command(&message.text) {
                    self.record_human(state, human_record(&message), message.addressed, now);
                }
                return Err(error);
            }
        };
        tracing::debug!(group_id = %state.group_id, ?watch, "overdue watch settled");
        let message = self.evaluate_message(state, message, now).await?;
        Ok(Outcome::WatchSettled {
            watch: Box::new(watch),
            message: Box::new(message),
        })
    }

    fn record_human(
        &self,
        state: &mut GroupConversationState,
        record: MessageRecord,
        addressed: bool,
        now: Timestamp,
    ) {
        state.governor.baseline.record_message(record.timestamp);
        state.history.push(record);
        state.last_human_at = now;
        if addressed {
            state.flow.on_addressed(now, &self.policies.flow);
        }
    }

    async fn evaluate_message(
        &self,
        state: &mut GroupConversationState,
        message: InboundMessage,
        now: Timestamp,
    ) -> EngineResult<Outcome> {
        state.expire_immersive(now);

        if self.is_command(&message.text) {
            if state.active_session() == Some(SessionKind::Immersive) {
                state.end_session("command message");
            }
            return Ok(Outcome::Skipped(SkipReason::Command));
        }

        let record = human_record(&message);

        let impression = self
            .collaborators
            .impressions
            .get_impression(&message.group_id, &message.sender_id)
            .await;

        let (relevance, interest, duplicate, continuity) = {
            let prior = state.history.records();
            (
                relevance::relevance(&record, prior),
                relevance::interest_score(&record, prior, impression, message.addressed),
                duplicate_penalty(&record, prior),
                continuity(&record, prior),
            )
        };

        self.record_human(state, record.clone(), message.addressed, now);

        let activity = activity::score(
            state.history.records(),
            now,
            self.config.activity_saturation_per_minute,
        );
        let fatigue_penalty = state.fatigue.penalty(now, &self.policies.fatigue);
        self.apply_mode(
            state,
            &ModeInput {
                now,
                activity,
                fatigue_penalty,
                candidate: Some(InterestSample {
                    user_id: message.sender_id.clone(),
                    interest,
                }),
            },
        );

        let trigger = if message.addressed {
            TriggerKind::ExplicitAddress
        } else if state.active_session() == Some(SessionKind::Immersive) {
            TriggerKind::ImmersiveFollowUp
        } else {
            TriggerKind::AmbientMessage
        };

        let mut conflicting_session = None;
        if state.active_session() == Some(SessionKind::ProactiveWatch) {
            if trigger == TriggerKind::ExplicitAddress
                && self.config.explicit_address_preempts_session
            {
                state.end_session("preempted by explicit address");
            } else {
                let deadline = state.collect_for_watch(record);
                if trigger != TriggerKind::ExplicitAddress {
                    return Ok(match deadline {
                        Some(deadline) => Outcome::Collected { deadline },
                        None => Outcome::Skipped(SkipReason::SessionActive),
                    });
                }
                conflicting_session = Some(SessionKind::ProactiveWatch);
            }
        }

        let decision = {
            let input = DecisionInput {
                trigger,
                mode: state.mode.mode(),
                sender_id: Some(&message.sender_id),
                activity,
                relevance,
                impression,
                fatigue_penalty,
                flow_contribution: state.flow.contribution(now, &self.policies.flow),
                continuity,
                duplicate_penalty: duplicate,
                surge: 0.0,
                consecutive_responses: state.consecutive_responses,
                threshold_multiplier: state.governor.multiplier(now, &self.policies.governor),
                conflicting_session,
            };
            self.engine.decide(&input, &mut state.rng)
        };
        self.note_decision(state, &decision, now);

        if !decision.should_respond {
            if let DecisionReason::SessionConflict(kind) = decision.reason {
                tracing::warn!(
                    group_id = %state.group_id,
                    sender_id = %message.sender_id,
                    active = ?kind,
                    "explicit address suppressed, session owned by another mechanism"
                );
            }
            state
                .governor
                .record_decision(false, now, &self.policies.governor);
            state.consecutive_responses = 0;
            return Ok(Outcome::Declined {
                trigger,
                score: decision.score,
                reason: DeclineReason::Gate(decision.reason),
            });
        }

        let kind = match trigger {
            TriggerKind::AmbientMessage if self.engine.needs_air_reading(trigger) => {
                PromptKind::AirReading
            }
            TriggerKind::ImmersiveFollowUp if self.engine.needs_air_reading(trigger) => {
                PromptKind::ImmersiveContinuation
            }
            _ => PromptKind::Reply,
        };
        let epoch = match trigger {
            TriggerKind::ImmersiveFollowUp => state.session.epoch(),
            _ => None,
        };

        let text = match self.judge(state, kind, trigger, decision.score).await {
            Ok(text) => text,
            Err(outcome) => {
                if outcome_is_veto(&outcome) {
                    if trigger == TriggerKind::ImmersiveFollowUp {
                        state.end_session("topic closed");
                    }
                    state
                        .governor
                        .record_decision(false, now, &self.policies.governor);
                    state.consecutive_responses = 0;
                }
                return Ok(outcome);
            }
        };

        if let Some(epoch) = epoch {
            if !state.session_is_current(epoch, self.clock.now()) {
                tracing::info!(
                    group_id = %state.group_id,
                    "immersive session ended during inference, discarding reply"
                );
                return Ok(Outcome::Declined {
                    trigger,
                    score: decision.score,
                    reason: DeclineReason::StaleSession,
                });
            }
        }

        if let Some(outcome) = self.dispatch(state, &text, trigger, decision.score).await? {
            return Ok(outcome);
        }

        let now = self.clock.now();
        let session = self.commit_reply(state, now, &text, SessionKind::Immersive);
        self.bump_impression(&state.group_id, &message.sender_id).await;

        Ok(Outcome::Replied {
            trigger,
            text,
            score: decision.score,
            session,
        })
    }

    // ── Heartbeat path ─────────────────────────────────

    async fn handle_tick(&self, state: &mut GroupConversationState) -> EngineResult<Outcome> {
        let now = self.clock.now();

        // mode follows activity on every tick, even ones that go no further
        let activity = activity::score(
            state.history.records(),
            now,
            self.config.activity_saturation_per_minute,
        );
        let fatigue_penalty = state.fatigue.penalty(now, &self.policies.fatigue);
        self.apply_mode(
            state,
            &ModeInput {
                now,
                activity,
                fatigue_penalty,
                candidate: None,
            },
        );

        if state.watch_due(now) {
            return self.resolve_watch(state, now).await;
        }
        state.expire_immersive(now);
        if state.session.is_active() {
            return Ok(Outcome::Skipped(SkipReason::SessionActive));
        }
        if now < state.cooldown_until {
            return Ok(Outcome::Skipped(SkipReason::Cooldown));
        }
        if matches!(state.mode.mode(), Mode::Observation) {
            return Ok(Outcome::Skipped(SkipReason::Observation));
        }

        let records = state.history.records();
        let last_human = records.iter().rposition(|r| !r.from_bot);
        let (relevance, continuity, sender) = match last_human {
            Some(idx) => (
                relevance::relevance(&records[idx], &records[..idx]),
                continuity(&records[idx], &records[..idx]),
                Some(records[idx].sender_id.clone()),
            ),
            None => (relevance::NEUTRAL, 0.0, None),
        };
        let last_minute = records
            .iter()
            .filter(|r| !r.from_bot && now - r.timestamp < 60.0 && r.timestamp <= now)
            .count();
        let surge = state.governor.baseline.surge(now, last_minute);
        let impression = match &sender {
            Some(user) => {
                self.collaborators
                    .impressions
                    .get_impression(&state.group_id, user)
                    .await
            }
            None => NEUTRAL_IMPRESSION,
        };

        let decision = {
            let input = DecisionInput {
                trigger: TriggerKind::HeartbeatProactive,
                mode: state.mode.mode(),
                sender_id: sender.as_deref(),
                activity,
                relevance,
                impression,
                fatigue_penalty,
                flow_contribution: state.flow.contribution(now, &self.policies.flow),
                continuity,
                duplicate_penalty: 0.0,
                surge,
                consecutive_responses: state.consecutive_responses,
                threshold_multiplier: state.governor.multiplier(now, &self.policies.governor),
                conflicting_session: None,
            };
            self.engine.decide(&input, &mut state.rng)
        };
        self.note_decision(state, &decision, now);

        if !decision.should_respond {
            state
                .governor
                .record_decision(false, now, &self.policies.governor);
            return Ok(Outcome::Declined {
                trigger: TriggerKind::HeartbeatProactive,
                score: decision.score,
                reason: DeclineReason::Gate(decision.reason),
            });
        }

        let text = match self
            .judge(
                state,
                PromptKind::HeartbeatInterjection,
                TriggerKind::HeartbeatProactive,
                decision.score,
            )
            .await
        {
            Ok(text) => text,
            Err(outcome) => {
                if outcome_is_veto(&outcome) {
                    state
                        .governor
                        .record_decision(false, now, &self.policies.governor);
                }
                return Ok(outcome);
            }
        };

        if let Some(outcome) = self
            .dispatch(state, &text, TriggerKind::HeartbeatProactive, decision.score)
            .await?
        {
            return Ok(outcome);
        }

        let now = self.clock.now();
        let session = self.commit_reply(state, now, &text, SessionKind::ProactiveWatch);
        let cooldown = state.flow.effective_cooldown(
            self.config.cooldown_seconds as f64,
            now,
            &self.policies.flow,
        );
        state.cooldown_until = now + cooldown;
        tracing::info!(
            group_id = %state.group_id,
            score = decision.score,
            cooldown,
            "proactive interjection sent"
        );

        Ok(Outcome::Replied {
            trigger: TriggerKind::HeartbeatProactive,
            text,
            score: decision.score,
            session,
        })
    }

    /// Close an elapsed proactive watch and decide whether to speak again.
    async fn resolve_watch(
        &self,
        state: &mut GroupConversationState,
        now: Timestamp,
    ) -> EngineResult<Outcome> {
        let trigger = TriggerKind::HeartbeatProactive;
        let collected = state.take_watch().unwrap_or_default();
        if collected.is_empty() {
            return Ok(Outcome::Declined {
                trigger,
                score: 0.0,
                reason: DeclineReason::NothingCollected,
            });
        }

        let (relevance, continuity) = {
            let records = state.history.records();
            let mut relevance_sum = 0.0;
            let mut best_continuity: f64 = 0.0;
            for msg in &collected {
                let idx = records
                    .iter()
                    .position(|r| r == msg)
                    .unwrap_or(records.len());
                relevance_sum += relevance::relevance(msg, &records[..idx]);
                best_continuity = best_continuity.max(continuity(msg, &records[..idx]));
            }
            (relevance_sum / collected.len() as f64, best_continuity)
        };

        let mut impression_sum = 0.0;
        for msg in &collected {
            impression_sum += self
                .collaborators
                .impressions
                .get_impression(&state.group_id, &msg.sender_id)
                .await;
        }
        let impression = impression_sum / collected.len() as f64;

        let activity = activity::score(
            state.history.records(),
            now,
            self.config.activity_saturation_per_minute,
        );
        let fatigue_penalty = state.fatigue.penalty(now, &self.policies.fatigue);

        let decision = {
            let input = DecisionInput {
                trigger,
                mode: state.mode.mode(),
                sender_id: None,
                activity,
                relevance,
                impression,
                fatigue_penalty,
                flow_contribution: state.flow.contribution(now, &self.policies.flow),
                continuity,
                duplicate_penalty: 0.0,
                surge: 0.0,
                consecutive_responses: state.consecutive_responses,
                threshold_multiplier: state.governor.multiplier(now, &self.policies.governor),
                conflicting_session: None,
            };
            self.engine.decide(&input, &mut state.rng)
        };
        self.note_decision(state, &decision, now);

        if !decision.should_respond {
            state
                .governor
                .record_decision(false, now, &self.policies.governor);
            state.consecutive_responses = 0;
            return Ok(Outcome::Declined {
                trigger,
                score: decision.score,
                reason: DeclineReason::Gate(decision.reason),
            });
        }

        let text = match self
            .judge(state, PromptKind::ProactiveConfirmation, trigger, decision.score)
            .await
        {
            Ok(text) => text,
            Err(outcome) => {
                if outcome_is_veto(&outcome) {
                    state
                        .governor
                        .record_decision(false, now, &self.policies.governor);
                    state.consecutive_responses = 0;
                }
                return Ok(outcome);
            }
        };

        if let Some(outcome) = self.dispatch(state, &text, trigger, decision.score).await? {
            return Ok(outcome);
        }

        let now = self.clock.now();
        let session = self.commit_reply(state, now, &text, SessionKind::ProactiveWatch);
        Ok(Outcome::Replied {
            trigger,
            text,
            score: decision.score,
            session,
        })
    }

    // ── Shared steps ───────────────────────────────────

    fn apply_mode(&self, state: &mut GroupConversationState, input: &ModeInput) {
        if let Some(t) = state.mode.evaluate(input, &self.policies.mode) {
            tracing::info!(
                group_id = %state.group_id,
                from = ?t.from,
                to = ?t.to,
                reason = t.reason,
                activity = input.activity,
                "mode transition"
            );
        }
    }

    fn note_decision(&self, state: &mut GroupConversationState, decision: &Decision, now: Timestamp) {
        tracing::debug!(
            group_id = %state.group_id,
            trigger = ?decision.trigger,
            score = decision.score,
            threshold = decision.threshold,
            respond = decision.should_respond,
            sample = ?decision.sample,
            "willingness evaluated"
        );
        state.last_decision = Some(DecisionRecord {
            trigger: decision.trigger,
            score: decision.score,
            threshold: decision.threshold,
            should_respond: decision.should_respond,
            reason: decision.reason.to_string(),
            at: now,
        });
    }

    /// Ask the model for the line to post. `Err` carries the non-reply outcome.
    async fn judge(
        &self,
        state: &GroupConversationState,
        kind: PromptKind,
        trigger: TriggerKind,
        score: f64,
    ) -> Result<String, Outcome> {
        let context = state.history.context_lines(JUDGMENT_CONTEXT_LINES);
        let declined = |reason| Outcome::Declined {
            trigger,
            score,
            reason,
        };
        match infer_with_timeout(
            self.collaborators.judge.as_ref(),
            &context,
            kind,
            self.config.inference_timeout_secs,
            &self.config.air_reading_no_reply_marker,
        )
        .await
        {
            Ok(Judgment::Reply(text)) => Ok(text),
            Ok(Judgment::Empty) if !self.config.fallback_reply.is_empty() => {
                tracing::debug!(group_id = %state.group_id, ?kind, "empty reply, using fallback");
                Ok(self.config.fallback_reply.clone())
            }
            Ok(Judgment::Empty) => {
                tracing::warn!(group_id = %state.group_id, ?kind, "judgment came back empty");
                Err(declined(DeclineReason::InferenceFailed))
            }
            Ok(Judgment::Decline) => {
                tracing::info!(group_id = %state.group_id, ?kind, "judgment declined to speak");
                Err(declined(DeclineReason::ModelVeto))
            }
            Err(EngineError::CollaboratorTimeout { .. }) => {
                tracing::warn!(
                    group_id = %state.group_id,
                    ?kind,
                    timeout_secs = self.config.inference_timeout_secs,
                    "judgment timed out"
                );
                Err(declined(DeclineReason::CollaboratorTimeout))
            }
            Err(error) => {
                tracing::warn!(group_id = %state.group_id, ?kind, %error, "judgment failed");
                Err(declined(DeclineReason::InferenceFailed))
            }
        }
    }

    /// Post the reply. `Ok(Some(_))` is a timeout outcome, `Err` a delivery failure.
    async fn dispatch(
        &self,
        state: &GroupConversationState,
        text: &str,
        trigger: TriggerKind,
        score: f64,
    ) -> EngineResult<Option<Outcome>> {
        let timeout_secs = self.config.dispatch_timeout_secs;
        let call = self
            .collaborators
            .dispatcher
            .dispatch_reply(&state.group_id, text);
        match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
            Ok(Ok(())) => Ok(None),
            Ok(Err(error)) => {
                tracing::warn!(group_id = %state.group_id, %error, "reply delivery failed");
                Err(EngineError::Delivery(error))
            }
            Err(_) => {
                tracing::warn!(
                    group_id = %state.group_id,
                    error = %DeliveryError::Timeout(timeout_secs),
                    "reply delivery timed out"
                );
                Ok(Some(Outcome::Declined {
                    trigger,
                    score,
                    reason: DeclineReason::CollaboratorTimeout,
                }))
            }
        }
    }

    /// Apply every counter update for a delivered reply, then arm follow-up
    /// sessions with `preferred` first. Returns the session left active.
    fn commit_reply(
        &self,
        state: &mut GroupConversationState,
        now: Timestamp,
        text: &str,
        preferred: SessionKind,
    ) -> Option<SessionKind> {
        state.history.push(MessageRecord::bot(
            &self.config.bot_id,
            &self.config.bot_name,
            text,
            now,
        ));
        state.fatigue.record_reply(now, &self.policies.fatigue);
        state
            .governor
            .record_decision(true, now, &self.policies.governor);
        state.flow.on_reply(now, &self.policies.flow);
        state.consecutive_responses += 1;
        if let Some(t) = state.mode.record_response() {
            tracing::info!(
                group_id = %state.group_id,
                from = ?t.from,
                to = ?t.to,
                reason = t.reason,
                "mode transition"
            );
        }

        let order = match preferred {
            SessionKind::Immersive => [SessionKind::Immersive, SessionKind::ProactiveWatch],
            SessionKind::ProactiveWatch => [SessionKind::ProactiveWatch, SessionKind::Immersive],
        };
        for kind in order {
            let (enabled, window) = match kind {
                SessionKind::Immersive => (
                    self.config.enable_immersive_chat,
                    self.config.immersive_chat_timeout,
                ),
                SessionKind::ProactiveWatch => (
                    self.config.enable_proactive_reply,
                    self.config.proactive_reply_delay,
                ),
            };
            if !enabled {
                continue;
            }
            let deadline = now + window as f64;
            match state.active_session() {
                Some(active) if active == kind => {
                    state.renew_session(kind, deadline);
                }
                Some(active) => {
                    tracing::debug!(
                        group_id = %state.group_id,
                        armed = ?active,
                        skipped = ?kind,
                        "follow-up session already armed"
                    );
                }
                None => {
                    if let Err(error) = state.try_start_session(kind, deadline) {
                        tracing::warn!(group_id = %state.group_id, %error, "follow-up session not armed");
                    }
                }
            }
        }
        state.active_session()
    }

    async fn bump_impression(&self, group_id: &str, user_id: &str) {
        let delta = self.config.impression_delta_per_exchange;
        if delta == 0.0 {
            return;
        }
        if let Err(error) = self
            .collaborators
            .impressions
            .update_impression(group_id, user_id, delta)
            .await
        {
            tracing::warn!(group_id, user_id, %error, "impression update failed");
        }
    }
}

fn human_record(message: &InboundMessage) -> MessageRecord {
    MessageRecord {
        sender_id: message.sender_id.clone(),
        sender_name: message.sender_name.clone(),
        text: message.text.clone(),
        has_attachment: message.has_attachment,
        timestamp: message.timestamp,
        from_bot: false,
    }
}

fn outcome_is_veto(outcome: &Outcome) -> bool {
    matches!(
        outcome,
        Outcome::Declined {
            reason: DeclineReason::ModelVeto,
            ..
        }
    )
}
