#![cfg(feature = "stress")]

use super::helpers::*;
use crate::ai::{GroupEvent, InboundMessage};
use crate::config::EngineConfig;
use std::sync::Arc;

fn message(group: &str, sender: &str, text: &str, ts: f64, addressed: bool) -> InboundMessage {
    InboundMessage {
        group_id: group.to_string(),
        sender_id: sender.to_string(),
        sender_name: sender.to_string(),
        text: text.to_string(),
        has_attachment: false,
        timestamp: ts,
        addressed,
    }
}

// ── Many groups in parallel ─────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_500_groups_in_parallel() {
    let cfg = EngineConfig {
        context_window_size: 100,
        ..test_config()
    };
    let h = Arc::new(Harness::new(cfg));
    h.at(0.0);

    let mut handles = Vec::new();
    for g in 0..500 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            let group = format!("group-{}", g);
            let mut replies = 0usize;
            for i in 0..10 {
                let msg = message(&group, &format!("u{}", i % 3), &format!("hello {}", i), T0, i == 0);
                let out = h
                    .coordinator
                    .on_event(GroupEvent::Message(msg))
                    .await
                    .unwrap();
                replies += out.replies();
            }
            (group, replies)
        }));
    }

    let mut total_replies = 0;
    for handle in handles {
        let (group, replies) = handle.await.unwrap();
        let report = h.coordinator.describe_state(&group).await.unwrap();
        assert_eq!(report.message_count, 10 + replies, "group {}", group);
        assert!(replies >= 1, "the addressed message in {} must be answered", group);
        total_replies += replies;
    }
    assert_eq!(h.coordinator.group_ids().await.len(), 500);
    assert_eq!(h.dispatcher.sent_count(), total_replies);
}

// ── One group, concurrent producers ─────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_same_group_events_are_serialized() {
    let cfg = EngineConfig {
        context_window_size: 1000,
        enable_proactive_reply: false,
        ..test_config()
    };
    let h = Arc::new(Harness::new(cfg));
    h.at(0.0);

    let mut handles = Vec::new();
    for i in 0..200 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            let msg = message(GROUP, &format!("u{}", i % 7), &format!("line {}", i), T0, i % 10 == 0);
            h.coordinator.on_event(GroupEvent::Message(msg)).await.unwrap()
        }));
    }

    let mut replied = 0;
    for handle in handles {
        replied += handle.await.unwrap().replies();
    }
    let report = h.state().await;
    assert_eq!(report.message_count, 200 + replied);
    assert_eq!(h.dispatcher.sent_count(), replied);
    assert!(report.active_session.is_some() || replied == 0);
}
