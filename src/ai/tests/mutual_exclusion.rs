use super::helpers::*;
use crate::ai::{
    DeclineReason, DecisionReason, GroupEvent, Outcome, SessionKind, SkipReason, TriggerKind,
};
use crate::config::EngineConfig;
use crate::llm::PromptKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Replies arm a proactive watch only.
fn watch_config() -> EngineConfig {
    EngineConfig {
        enable_immersive_chat: false,
        proactive_reply_delay: 8,
        ..test_config()
    }
}

// ── Explicit address vs. proactive watch ────────────────────

#[tokio::test]
async fn test_explicit_address_suppressed_during_watch() {
    let h = Harness::new(watch_config());

    h.at(0.0);
    let opened = h.address("alice", "kokoro, tell us a joke").await;
    assert!(matches!(
        opened,
        Outcome::Replied {
            session: Some(SessionKind::ProactiveWatch),
            ..
        }
    ));

    h.at(2.0);
    let suppressed = h.address("bob", "kokoro, one more").await;
    assert!(
        matches!(
            suppressed,
            Outcome::Declined {
                trigger: TriggerKind::ExplicitAddress,
                reason: DeclineReason::Gate(DecisionReason::SessionConflict(
                    SessionKind::ProactiveWatch
                )),
                ..
            }
        ),
        "{:?}",
        suppressed
    );
    assert_eq!(h.dispatcher.sent_count(), 1);

    let report = h.state().await;
    assert_eq!(
        report.active_session.map(|s| s.kind),
        Some(SessionKind::ProactiveWatch)
    );
    let last = report.last_decision.unwrap();
    assert!(!last.should_respond);
    assert!(last.reason.contains("ProactiveWatch"), "{}", last.reason);

    h.at(3.0);
    assert_eq!(
        h.say("carol", "haha that was bad").await,
        Outcome::Collected { deadline: T0 + 8.0 }
    );
}

#[tokio::test]
async fn test_explicit_address_preempts_watch_when_enabled() {
    let cfg = EngineConfig {
        explicit_address_preempts_session: true,
        ..watch_config()
    };
    let h = Harness::new(cfg);

    h.at(0.0);
    h.address("alice", "kokoro, tell us a joke").await;
    h.at(2.0);
    let out = h.address("bob", "kokoro, one more").await;
    assert!(
        matches!(
            out,
            Outcome::Replied {
                trigger: TriggerKind::ExplicitAddress,
                session: Some(SessionKind::ProactiveWatch),
                ..
            }
        ),
        "{:?}",
        out
    );
    assert_eq!(h.dispatcher.sent_count(), 2);

    // the preempted watch was replaced by a fresh one
    let session = h.state().await.active_session.unwrap();
    assert!((session.seconds_left - 8.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_explicit_address_during_immersive_renews_it() {
    let cfg = EngineConfig {
        enable_proactive_reply: false,
        ..test_config()
    };
    let h = Harness::new(cfg);

    h.at(0.0);
    h.address("alice", "kokoro hello").await;
    h.at(10.0);
    let out = h.address("bob", "kokoro, me too").await;
    assert!(matches!(
        out,
        Outcome::Replied {
            trigger: TriggerKind::ExplicitAddress,
            session: Some(SessionKind::Immersive),
            ..
        }
    ));
    let session = h.state().await.active_session.unwrap();
    assert!((session.seconds_left - 120.0).abs() < 1e-6);
}

// ── Session preference ──────────────────────────────────────

#[tokio::test]
async fn test_message_reply_prefers_immersive() {
    let h = Harness::new(test_config());
    h.at(0.0);
    let out = h.address("alice", "kokoro hi").await;
    assert!(matches!(
        out,
        Outcome::Replied {
            session: Some(SessionKind::Immersive),
            ..
        }
    ));
    assert_eq!(
        h.state().await.active_session.map(|s| s.kind),
        Some(SessionKind::Immersive)
    );

    h.at(30.0);
    assert_eq!(h.tick().await, Outcome::Skipped(SkipReason::SessionActive));
}

/// Counts WARN events seen while installed.
struct WarnCounter(Arc<AtomicUsize>);

impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn test_arming_one_of_two_sessions_is_quiet() {
    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = Harness::new(test_config());
    h.at(0.0);
    assert!(matches!(
        h.address("alice", "kokoro hi").await,
        Outcome::Replied {
            session: Some(SessionKind::Immersive),
            ..
        }
    ));
    h.at(10.0);
    h.address("alice", "kokoro, again").await;
    assert_eq!(warnings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_heartbeat_reply_prefers_watch() {
    let cfg = EngineConfig {
        heartbeat_threshold: 0.0,
        willingness_threshold: 1.0,
        ..test_config()
    };
    let h = Harness::new(cfg);
    h.burst(0.0).await;
    h.at(10.0);
    let out = h.tick().await;
    assert!(
        matches!(
            out,
            Outcome::Replied {
                trigger: TriggerKind::HeartbeatProactive,
                session: Some(SessionKind::ProactiveWatch),
                ..
            }
        ),
        "{:?}",
        out
    );
}

// ── Watch resolution ────────────────────────────────────────

#[tokio::test]
async fn test_watch_with_reactions_speaks_again() {
    let cfg = EngineConfig {
        heartbeat_threshold: 0.0,
        ..watch_config()
    };
    let h = Harness::new(cfg);

    h.at(0.0);
    h.address("alice", "kokoro, any plans for the weekend?").await;
    h.at(3.0);
    h.say("bob", "count me in for the weekend hike").await;

    h.at(9.0);
    let out = h.tick().await;
    assert!(
        matches!(
            out,
            Outcome::Replied {
                trigger: TriggerKind::HeartbeatProactive,
                session: Some(SessionKind::ProactiveWatch),
                ..
            }
        ),
        "{:?}",
        out
    );
    assert_eq!(
        h.judge.kinds(),
        vec![PromptKind::Reply, PromptKind::ProactiveConfirmation]
    );
    assert_eq!(h.dispatcher.sent_count(), 2);
}

#[tokio::test]
async fn test_silent_watch_closes_without_speaking() {
    let h = Harness::new(watch_config());
    h.at(0.0);
    h.address("alice", "kokoro, good night").await;

    h.at(9.0);
    assert_eq!(
        h.tick().await,
        Outcome::Declined {
            trigger: TriggerKind::HeartbeatProactive,
            score: 0.0,
            reason: DeclineReason::NothingCollected,
        }
    );
    assert!(h.state().await.active_session.is_none());
    assert_eq!(h.judge.calls(), 1);
}

#[tokio::test]
async fn test_overdue_watch_is_settled_before_next_message() {
    let cfg = EngineConfig {
        heartbeat_threshold: 0.0,
        ..watch_config()
    };
    let h = Harness::new(cfg);

    h.at(0.0);
    h.address("alice", "kokoro, any plans for the weekend?").await;
    h.at(3.0);
    h.say("bob", "count me in for the weekend hike").await;

    // no tick arrived; the next message closes the watch first
    h.at(20.0);
    let out = h.say("carol", "me too").await;
    let Outcome::WatchSettled { watch, message } = &out else {
        panic!("expected a settled watch, got {:?}", out);
    };
    assert!(
        matches!(
            **watch,
            Outcome::Replied {
                trigger: TriggerKind::HeartbeatProactive,
                session: Some(SessionKind::ProactiveWatch),
                ..
            }
        ),
        "{:?}",
        watch
    );
    assert_eq!(**message, Outcome::Collected { deadline: T0 + 28.0 });
    assert_eq!(out.event(), &Outcome::Collected { deadline: T0 + 28.0 });
    assert_eq!(out.replies(), 1);
    assert_eq!(h.dispatcher.sent_count(), 2);
}

#[tokio::test]
async fn test_watch_deadline_event_closes_only_a_due_watch() {
    let cfg = EngineConfig {
        heartbeat_threshold: 0.0,
        willingness_threshold: 1.0,
        ..watch_config()
    };
    let h = Harness::new(cfg);
    h.burst(0.0).await;

    h.at(10.0);
    assert!(matches!(h.tick().await, Outcome::Replied { .. }));

    // a deadline event from before a renewal is ignored
    h.at(15.0);
    assert_eq!(
        h.watch_deadline().await,
        Outcome::Skipped(SkipReason::WatchNotDue)
    );
    assert_eq!(h.tick().await, Outcome::Skipped(SkipReason::SessionActive));

    h.at(18.0);
    assert_eq!(
        h.watch_deadline().await,
        Outcome::Declined {
            trigger: TriggerKind::HeartbeatProactive,
            score: 0.0,
            reason: DeclineReason::NothingCollected,
        }
    );
    assert!(h.state().await.active_session.is_none());

    h.at(21.0);
    let next = h.tick().await;
    assert!(!matches!(next, Outcome::Skipped(_)), "{:?}", next);
}

#[tokio::test]
async fn test_watch_deadline_for_unknown_group() {
    let h = Harness::new(watch_config());
    let out = h
        .coordinator
        .on_event(GroupEvent::WatchDeadline {
            group_id: "ghost".into(),
        })
        .await
        .unwrap();
    assert_eq!(out, Outcome::Skipped(SkipReason::UnknownGroup));
}
