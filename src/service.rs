//! Host-facing facade: routes platform messages into the coordinator and keeps
//! a heartbeat running for every group it has seen.

use crate::ai::{
    Collaborators, GroupEvent, HeartbeatScheduler, InboundMessage, Outcome, SessionCoordinator,
    SkipReason, StateReport,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{self, EngineConfig};
use crate::error::EngineResult;
use crate::host::{ImpressionStore, ReplyDispatcher};
use crate::llm::config as judge_config;
use crate::llm::OpenAIJudge;
use crate::logging;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct GroupChatService {
    coordinator: Arc<SessionCoordinator>,
    heartbeat: Arc<HeartbeatScheduler>,
}

impl GroupChatService {
    /// Validates `config` and wires the collaborators. No tasks start until
    /// the first message arrives.
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
    ) -> EngineResult<Self> {
        let coordinator = Arc::new(SessionCoordinator::new(config, clock, collaborators)?);
        let heartbeat = Arc::new(HeartbeatScheduler::new(coordinator.clone()));
        Ok(Self {
            coordinator,
            heartbeat,
        })
    }

    /// Boot from `engine.json` + `judge.json`, using the OpenAI-compatible judge
    /// and the group list from the engine config.
    pub fn from_config_files(
        engine_path: &Path,
        judge_path: &Path,
        dispatcher: Arc<dyn ReplyDispatcher>,
        impressions: Arc<dyn ImpressionStore>,
    ) -> anyhow::Result<Self> {
        let engine = config::load_engine_config(engine_path);
        logging::init_tracing(engine.enable_detailed_logging);

        let judge_cfg = judge_config::load_config(judge_path);
        let judge = OpenAIJudge::from_config(
            &judge_cfg,
            &engine.bot_name,
            &engine.air_reading_no_reply_marker,
        )
        .with_context(|| {
            format!(
                "no API key for the judgment model (set api_key or {} in {})",
                judge_cfg.api_key_env.as_deref().unwrap_or("api_key_env"),
                judge_path.display()
            )
        })?;

        let collaborators = Collaborators {
            judge: Arc::new(judge),
            dispatcher,
            impressions,
            filter: Arc::new(engine.group_list.clone()),
        };
        Self::new(engine, Arc::new(SystemClock), collaborators).with_context(|| {
            format!("invalid engine configuration in {}", engine_path.display())
        })
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// Handle one inbound group message. Starts the group's heartbeat on first contact.
    pub async fn on_message(&self, message: InboundMessage) -> EngineResult<Outcome> {
        let group_id = message.group_id.clone();
        let outcome = self
            .coordinator
            .on_event(GroupEvent::Message(message))
            .await;
        if !matches!(outcome, Ok(Outcome::Skipped(SkipReason::IneligibleGroup))) {
            self.heartbeat.ensure_group(&group_id).await;
        }
        outcome
    }

    pub async fn describe_state(&self, group_id: &str) -> Option<StateReport> {
        self.coordinator.describe_state(group_id).await
    }

    pub async fn is_ticking(&self, group_id: &str) -> bool {
        self.heartbeat.is_running(group_id).await
    }

    /// Forget a group entirely: stop its heartbeat and drop its state.
    pub async fn remove_group(&self, group_id: &str) -> bool {
        self.heartbeat.cancel(group_id).await;
        self.coordinator.remove_group(group_id).await
    }

    /// Stop every timer and end every session.
    pub async fn shutdown(&self) {
        self.heartbeat.shutdown().await;
        self.coordinator.clear_sessions().await;
        tracing::info!("group chat service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::tests::helpers::{
        test_config, whitelist, RecordingDispatcher, ScriptedJudge, GROUP, T0,
    };
    use crate::clock::ManualClock;
    use crate::host::{GroupListConfig, InMemoryImpressionStore};
    use crate::llm::config::JudgeConfig;

    fn service(filter: GroupListConfig) -> (GroupChatService, ManualClock) {
        let clock = ManualClock::new(T0);
        let collaborators = Collaborators {
            judge: Arc::new(ScriptedJudge::new("hey!")),
            dispatcher: Arc::new(RecordingDispatcher::default()),
            impressions: Arc::new(InMemoryImpressionStore::default()),
            filter: Arc::new(filter),
        };
        let svc =
            GroupChatService::new(test_config(), Arc::new(clock.clone()), collaborators).unwrap();
        (svc, clock)
    }

    fn inbound(group: &str, text: &str, addressed: bool) -> InboundMessage {
        InboundMessage {
            group_id: group.to_string(),
            sender_id: "alice".into(),
            sender_name: "Alice".into(),
            text: text.to_string(),
            has_attachment: false,
            timestamp: T0,
            addressed,
        }
    }

    #[tokio::test]
    async fn first_message_starts_the_heartbeat() {
        let (svc, _clock) = service(GroupListConfig::default());
        let out = svc.on_message(inbound(GROUP, "kokoro hi", true)).await.unwrap();
        assert!(matches!(out, Outcome::Replied { .. }));
        assert!(svc.is_ticking(GROUP).await);
        assert!(svc.describe_state(GROUP).await.is_some());

        assert!(svc.remove_group(GROUP).await);
        assert!(!svc.is_ticking(GROUP).await);
        assert!(svc.describe_state(GROUP).await.is_none());
    }

    #[tokio::test]
    async fn ineligible_group_gets_no_heartbeat() {
        let (svc, _clock) = service(whitelist(&["allowed"]));
        let out = svc.on_message(inbound(GROUP, "kokoro hi", true)).await.unwrap();
        assert_eq!(out, Outcome::Skipped(SkipReason::IneligibleGroup));
        assert!(!svc.is_ticking(GROUP).await);
    }

    #[tokio::test]
    async fn shutdown_stops_every_heartbeat() {
        let (svc, _clock) = service(GroupListConfig::default());
        svc.on_message(inbound("a", "hello", false)).await.unwrap();
        svc.on_message(inbound("b", "kokoro hello", true)).await.unwrap();
        assert!(svc.is_ticking("a").await && svc.is_ticking("b").await);

        svc.shutdown().await;
        assert!(!svc.is_ticking("a").await);
        assert!(!svc.is_ticking("b").await);
        let report = svc.describe_state("b").await.unwrap();
        assert!(report.active_session.is_none());
    }

    #[test]
    fn config_files_without_api_key_fail_with_context() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine_path = tmp.path().join("engine.json");
        let judge_path = tmp.path().join("judge.json");
        config::save_engine_config(&engine_path, &test_config()).unwrap();
        let judge = JudgeConfig {
            api_key: None,
            api_key_env: Some("KOKORO_TEST_UNSET_KEY".into()),
            ..JudgeConfig::default()
        };
        judge_config::save_config(&judge_path, &judge).unwrap();

        let err = GroupChatService::from_config_files(
            &engine_path,
            &judge_path,
            Arc::new(RecordingDispatcher::default()),
            Arc::new(InMemoryImpressionStore::default()),
        )
        .err()
        .expect("missing key must fail");
        assert!(err.to_string().contains("KOKORO_TEST_UNSET_KEY"), "{:#}", err);
    }

    #[test]
    fn config_files_with_invalid_engine_config_fail() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine_path = tmp.path().join("engine.json");
        let judge_path = tmp.path().join("judge.json");
        // no bot_id
        std::fs::write(&engine_path, r#"{"bot_name": "Kokoro"}"#).unwrap();
        let judge = JudgeConfig {
            api_key: Some("sk-test".into()),
            ..JudgeConfig::default()
        };
        judge_config::save_config(&judge_path, &judge).unwrap();

        let err = GroupChatService::from_config_files(
            &engine_path,
            &judge_path,
            Arc::new(RecordingDispatcher::default()),
            Arc::new(InMemoryImpressionStore::default()),
        )
        .err()
        .expect("engine config without bot_id must fail");
        let chain = format!("{:#}", err);
        assert!(chain.contains("invalid engine configuration"), "{}", chain);
        assert!(chain.contains("bot_id"), "{}", chain);
    }

    #[test]
    fn config_files_boot_a_service() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine_path = tmp.path().join("engine.json");
        let judge_path = tmp.path().join("judge.json");
        config::save_engine_config(&engine_path, &test_config()).unwrap();
        let judge = JudgeConfig {
            api_key: Some("sk-test".into()),
            base_url: Some("http://127.0.0.1:9/v1".into()),
            ..JudgeConfig::default()
        };
        judge_config::save_config(&judge_path, &judge).unwrap();

        let svc = GroupChatService::from_config_files(
            &engine_path,
            &judge_path,
            Arc::new(RecordingDispatcher::default()),
            Arc::new(InMemoryImpressionStore::default()),
        )
        .unwrap();
        assert_eq!(svc.coordinator().config().bot_id, "bot-1");
    }
}
