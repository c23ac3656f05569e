//! Per-group conversation state: message history, extension session slot,
//! and the counters every decision reads.

use super::fatigue::FatigueTracker;
use super::flow::FlowEnergy;
use super::frequency::FrequencyGovernor;
use super::mode::ModeController;
use super::willingness::TriggerKind;
use crate::clock::Timestamp;
use crate::config::EngineConfig;
use crate::error::EngineError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

// ── Messages ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub has_attachment: bool,
    pub timestamp: Timestamp,
    /// Utterance sent by the bot itself.
    pub from_bot: bool,
}

impl MessageRecord {
    pub fn human(sender_id: &str, sender_name: &str, text: &str, timestamp: Timestamp) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            text: text.to_string(),
            has_attachment: false,
            timestamp,
            from_bot: false,
        }
    }

    pub fn bot(bot_id: &str, bot_name: &str, text: &str, timestamp: Timestamp) -> Self {
        Self {
            from_bot: true,
            ..Self::human(bot_id, bot_name, text, timestamp)
        }
    }

    /// `name: text` line used when handing context to the judgment model.
    pub fn context_line(&self) -> String {
        if self.has_attachment {
            format!("{}: {} [attachment]", self.sender_name, self.text)
        } else {
            format!("{}: {}", self.sender_name, self.text)
        }
    }
}

/// Bounded, time-ordered history. Evicts by count and by age on insert.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    records: Vec<MessageRecord>,
    capacity: usize,
    max_age_secs: f64,
}

impl MessageHistory {
    pub fn new(capacity: usize, max_age_secs: f64) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            max_age_secs,
        }
    }

    pub fn push(&mut self, record: MessageRecord) {
        let horizon = record.timestamp - self.max_age_secs;
        self.records.push(record);
        let stale = self
            .records
            .iter()
            .take_while(|r| r.timestamp < horizon)
            .count();
        let overflow = self.records.len().saturating_sub(self.capacity);
        let drop = stale.max(overflow);
        if drop > 0 {
            self.records.drain(..drop);
        }
    }

    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_bot_message(&self) -> Option<&MessageRecord> {
        self.records.iter().rev().find(|r| r.from_bot)
    }

    pub fn last_human_message(&self) -> Option<&MessageRecord> {
        self.records.iter().rev().find(|r| !r.from_bot)
    }

    /// Last `n` records as `name: text` lines, oldest first.
    pub fn context_lines(&self, n: usize) -> Vec<String> {
        let start = self.records.len().saturating_sub(n);
        self.records[start..]
            .iter()
            .map(MessageRecord::context_line)
            .collect()
    }
}

// ── Extension sessions ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Immersive,
    ProactiveWatch,
}

/// At most one per group. The enum makes "two at once" unrepresentable; the
/// slot methods on [`GroupConversationState`] enforce first-registered-wins.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionSession {
    None,
    Immersive {
        deadline: Timestamp,
        epoch: u64,
    },
    ProactiveWatch {
        deadline: Timestamp,
        collected: Vec<MessageRecord>,
        epoch: u64,
    },
}

impl ExtensionSession {
    pub fn kind(&self) -> Option<SessionKind> {
        match self {
            ExtensionSession::None => None,
            ExtensionSession::Immersive { .. } => Some(SessionKind::Immersive),
            ExtensionSession::ProactiveWatch { .. } => Some(SessionKind::ProactiveWatch),
        }
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        match self {
            ExtensionSession::None => None,
            ExtensionSession::Immersive { deadline, .. }
            | ExtensionSession::ProactiveWatch { deadline, .. } => Some(*deadline),
        }
    }

    pub fn epoch(&self) -> Option<u64> {
        match self {
            ExtensionSession::None => None,
            ExtensionSession::Immersive { epoch, .. }
            | ExtensionSession::ProactiveWatch { epoch, .. } => Some(*epoch),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, ExtensionSession::None)
    }
}

// ── Decisions ──────────────────────────────────────────

/// Summary of the most recent evaluated decision, kept for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub trigger: TriggerKind,
    pub score: f64,
    pub threshold: f64,
    pub should_respond: bool,
    pub reason: String,
    pub at: Timestamp,
}

// ── Group state ────────────────────────────────────────

pub struct GroupConversationState {
    pub group_id: String,
    pub history: MessageHistory,
    pub mode: ModeController,
    pub fatigue: FatigueTracker,
    pub governor: FrequencyGovernor,
    pub flow: FlowEnergy,
    pub session: ExtensionSession,
    /// Bot replies since the last human message that went unanswered.
    pub consecutive_responses: u32,
    /// Heartbeat evaluation is skipped until this instant.
    pub cooldown_until: Timestamp,
    pub last_human_at: Timestamp,
    pub last_decision: Option<DecisionRecord>,
    pub rng: StdRng,
    next_epoch: u64,
    /// Deadline of the active proactive watch, if any.
    watch_deadline: watch::Sender<Option<Timestamp>>,
}

/// FNV-1a, stable across runs so seeded groups replay identically.
fn group_hash(group_id: &str) -> u64 {
    group_id.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

impl GroupConversationState {
    pub fn new(group_id: &str, config: &EngineConfig, now: Timestamp) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ group_hash(group_id)),
            None => StdRng::from_entropy(),
        };
        Self {
            group_id: group_id.to_string(),
            history: MessageHistory::new(
                config.context_window_size,
                config.context_max_age_secs as f64,
            ),
            mode: ModeController::new(),
            fatigue: FatigueTracker::new(now),
            governor: FrequencyGovernor::new(now),
            flow: FlowEnergy::new(now),
            session: ExtensionSession::None,
            consecutive_responses: 0,
            cooldown_until: now,
            last_human_at: now,
            last_decision: None,
            rng,
            next_epoch: 1,
            watch_deadline: watch::Sender::new(None),
        }
    }

    /// Follow the proactive watch deadline. `None` once the watch is gone.
    pub fn subscribe_watch_deadline(&self) -> watch::Receiver<Option<Timestamp>> {
        self.watch_deadline.subscribe()
    }

    fn publish_watch_deadline(&self) {
        let deadline = match self.session {
            ExtensionSession::ProactiveWatch { deadline, .. } => Some(deadline),
            _ => None,
        };
        self.watch_deadline.send_if_modified(|current| {
            let changed = *current != deadline;
            *current = deadline;
            changed
        });
    }

    fn bump_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    pub fn active_session(&self) -> Option<SessionKind> {
        self.session.kind()
    }

    /// Register a new session. Rejected when any session is already active.
    pub fn try_start_session(
        &mut self,
        kind: SessionKind,
        deadline: Timestamp,
    ) -> Result<u64, EngineError> {
        if let Some(active) = self.session.kind() {
            tracing::warn!(
                group_id = %self.group_id,
                requested = ?kind,
                active = ?active,
                "session start rejected, another session is active"
            );
            return Err(EngineError::InvariantViolation(format!(
                "cannot start {:?} while {:?} is active in group {}",
                kind, active, self.group_id
            )));
        }
        let epoch = self.bump_epoch();
        self.session = match kind {
            SessionKind::Immersive => ExtensionSession::Immersive { deadline, epoch },
            SessionKind::ProactiveWatch => ExtensionSession::ProactiveWatch {
                deadline,
                collected: Vec::new(),
                epoch,
            },
        };
        self.publish_watch_deadline();
        tracing::info!(group_id = %self.group_id, kind = ?kind, deadline, "session started");
        Ok(epoch)
    }

    /// Re-arm the active session if it is of `kind`. Outstanding work bound to
    /// the previous epoch becomes stale.
    pub fn renew_session(&mut self, kind: SessionKind, deadline: Timestamp) -> Option<u64> {
        if self.session.kind() != Some(kind) {
            return None;
        }
        let epoch = self.bump_epoch();
        self.session = match kind {
            SessionKind::Immersive => ExtensionSession::Immersive { deadline, epoch },
            SessionKind::ProactiveWatch => ExtensionSession::ProactiveWatch {
                deadline,
                collected: Vec::new(),
                epoch,
            },
        };
        self.publish_watch_deadline();
        tracing::debug!(group_id = %self.group_id, kind = ?kind, deadline, "session renewed");
        Some(epoch)
    }

    pub fn end_session(&mut self, why: &str) -> Option<SessionKind> {
        let ended = self.session.kind();
        if let Some(kind) = ended {
            self.session = ExtensionSession::None;
            self.publish_watch_deadline();
            tracing::info!(group_id = %self.group_id, kind = ?kind, why, "session ended");
        }
        ended
    }

    /// Immersive session whose deadline has passed is dropped.
    pub fn expire_immersive(&mut self, now: Timestamp) -> bool {
        match self.session {
            ExtensionSession::Immersive { deadline, .. } if now > deadline => {
                self.end_session("timeout");
                true
            }
            _ => false,
        }
    }

    /// Proactive watch whose collection window has elapsed.
    pub fn watch_due(&self, now: Timestamp) -> bool {
        matches!(self.session, ExtensionSession::ProactiveWatch { deadline, .. } if now >= deadline)
    }

    pub fn collect_for_watch(&mut self, record: MessageRecord) -> Option<Timestamp> {
        match &mut self.session {
            ExtensionSession::ProactiveWatch {
                deadline,
                collected,
                ..
            } => {
                collected.push(record);
                Some(*deadline)
            }
            _ => None,
        }
    }

    /// Close the watch and hand back what it gathered.
    pub fn take_watch(&mut self) -> Option<Vec<MessageRecord>> {
        match std::mem::replace(&mut self.session, ExtensionSession::None) {
            ExtensionSession::ProactiveWatch { collected, .. } => {
                self.publish_watch_deadline();
                tracing::info!(
                    group_id = %self.group_id,
                    collected = collected.len(),
                    "proactive watch closed"
                );
                Some(collected)
            }
            other => {
                self.session = other;
                None
            }
        }
    }

    /// Still the same session that was active when `epoch` was captured, and not expired.
    pub fn session_is_current(&self, epoch: u64, now: Timestamp) -> bool {
        self.session.epoch() == Some(epoch) && self.session.deadline().is_some_and(|d| now <= d)
    }
}
