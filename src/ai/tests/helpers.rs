use crate::ai::{
    Collaborators, GroupEvent, InboundMessage, Outcome, SessionCoordinator, StateReport,
};
use crate::clock::{Clock, ManualClock};
use crate::config::EngineConfig;
use crate::error::DeliveryError;
use crate::host::{
    GroupListConfig, ImpressionStore, InMemoryImpressionStore, ListMode, ReplyDispatcher,
};
use crate::llm::{JudgmentProvider, PromptKind};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GROUP: &str = "group-1";
pub const T0: f64 = 1_700_000_000.0;
pub const MARKER: &str = "<NO_RESPONSE>";

/// Seeded, jitter-free config so scores are reproducible.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        bot_id: "bot-1".into(),
        bot_name: "Kokoro".into(),
        random_seed: Some(42),
        base_probability_jitter: 0.0,
        ..EngineConfig::default()
    }
}

// ── Judge ───────────────────────────────────────────────────

/// Judgment model that answers from a script, then falls back to `default_reply`.
pub struct ScriptedJudge {
    script: Mutex<VecDeque<Result<String, String>>>,
    default_reply: String,
    delay: Mutex<Option<Duration>>,
    stall: Mutex<Option<(ManualClock, f64)>>,
    calls: AtomicUsize,
    kinds: Mutex<Vec<PromptKind>>,
}

#[allow(dead_code)]
impl ScriptedJudge {
    pub fn new(default_reply: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: default_reply.to_string(),
            delay: Mutex::new(None),
            stall: Mutex::new(None),
            calls: AtomicUsize::new(0),
            kinds: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, text: &str) {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn push_decline(&self) {
        self.push_reply(MARKER);
    }

    pub fn push_error(&self, error: &str) {
        self.script.lock().unwrap().push_back(Err(error.to_string()));
    }

    /// Every call sleeps this long (tokio time).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// The next call moves the engine clock forward by `secs` before answering.
    pub fn stall_next(&self, clock: &ManualClock, secs: f64) {
        *self.stall.lock().unwrap() = Some((clock.clone(), secs));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn kinds(&self) -> Vec<PromptKind> {
        self.kinds.lock().unwrap().clone()
    }
}

#[async_trait]
impl JudgmentProvider for ScriptedJudge {
    async fn infer_judgment(&self, _context: &[String], kind: PromptKind) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.kinds.lock().unwrap().push(kind);
        if let Some((clock, secs)) = self.stall.lock().unwrap().take() {
            clock.advance(secs);
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(self.default_reply.clone()))
    }

    fn id(&self) -> &str {
        "scripted"
    }
}

// ── Dispatcher ──────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(String, String)>>,
    failure: Mutex<Option<DeliveryError>>,
    delay: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn fail_with(&self, error: DeliveryError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ReplyDispatcher for RecordingDispatcher {
    async fn dispatch_reply(&self, group_id: &str, text: &str) -> Result<(), DeliveryError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.sent
            .lock()
            .unwrap()
            .push((group_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────

pub struct Harness {
    pub coordinator: Arc<SessionCoordinator>,
    pub clock: ManualClock,
    pub judge: Arc<ScriptedJudge>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub impressions: Arc<InMemoryImpressionStore>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_filter(config, GroupListConfig::default())
    }

    pub fn with_filter(config: EngineConfig, filter: GroupListConfig) -> Self {
        let clock = ManualClock::new(T0);
        let judge = Arc::new(ScriptedJudge::new("sounds good"));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let impressions = Arc::new(InMemoryImpressionStore::new(0.5));
        let collaborators = Collaborators {
            judge: judge.clone(),
            dispatcher: dispatcher.clone(),
            impressions: impressions.clone(),
            filter: Arc::new(filter),
        };
        let coordinator = SessionCoordinator::new(config, Arc::new(clock.clone()), collaborators)
            .expect("test config must validate");
        Self {
            coordinator: Arc::new(coordinator),
            clock,
            judge,
            dispatcher,
            impressions,
        }
    }

    /// Move the clock to `T0 + secs`.
    pub fn at(&self, secs: f64) {
        self.clock.set(T0 + secs);
    }

    pub fn message(&self, sender: &str, text: &str, addressed: bool) -> InboundMessage {
        InboundMessage {
            group_id: GROUP.to_string(),
            sender_id: sender.to_string(),
            sender_name: sender.to_string(),
            text: text.to_string(),
            has_attachment: false,
            timestamp: self.clock.now(),
            addressed,
        }
    }

    pub async fn say(&self, sender: &str, text: &str) -> Outcome {
        let msg = self.message(sender, text, false);
        self.coordinator
            .on_event(GroupEvent::Message(msg))
            .await
            .expect("ambient message should not fail")
    }

    pub async fn address(&self, sender: &str, text: &str) -> Outcome {
        let msg = self.message(sender, text, true);
        self.coordinator
            .on_event(GroupEvent::Message(msg))
            .await
            .expect("addressed message should not fail")
    }

    pub async fn tick(&self) -> Outcome {
        self.coordinator
            .on_event(GroupEvent::HeartbeatTick {
                group_id: GROUP.to_string(),
            })
            .await
            .expect("heartbeat should not fail")
    }

    pub async fn watch_deadline(&self) -> Outcome {
        self.coordinator
            .on_event(GroupEvent::WatchDeadline {
                group_id: GROUP.to_string(),
            })
            .await
            .expect("watch deadline should not fail")
    }

    pub async fn impressions_for(&self, user: &str) -> f64 {
        self.impressions.get_impression(GROUP, user).await
    }

    pub async fn state(&self) -> StateReport {
        self.coordinator
            .describe_state(GROUP)
            .await
            .expect("group should be tracked")
    }

    /// Five messages from three people over four seconds: enough to leave Observation.
    pub async fn burst(&self, start: f64) {
        for (i, sender) in ["alice", "bob", "carol", "alice", "bob"].iter().enumerate() {
            self.at(start + i as f64);
            self.say(sender, &format!("message number {} about the raid", i))
                .await;
        }
    }
}

pub fn whitelist(groups: &[&str]) -> GroupListConfig {
    GroupListConfig {
        mode: ListMode::Whitelist,
        groups: groups.iter().map(|g| g.to_string()).collect(),
    }
}
