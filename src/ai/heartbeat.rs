//! Heartbeat scheduler — one periodic tick task per tracked group.
//!
//! Each task feeds `HeartbeatTick` events into the coordinator, so ticks queue
//! behind in-flight messages on the group lock instead of racing them. A task
//! ends when its group is evicted, removed, or the scheduler shuts down.
//!
//! The same task also sleeps until the group's proactive watch deadline and
//! fires a `WatchDeadline` event there, so a watch closes on time even when no
//! tick or message lands after it.

use super::session::{GroupEvent, Outcome, SessionCoordinator, SkipReason};
use crate::clock::Timestamp;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

struct TickTask {
    id: u64,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

type TaskMap = Arc<RwLock<HashMap<String, TickTask>>>;

pub struct HeartbeatScheduler {
    coordinator: Arc<SessionCoordinator>,
    period: Duration,
    tasks: TaskMap,
    next_id: AtomicU64,
}

impl HeartbeatScheduler {
    pub fn new(coordinator: Arc<SessionCoordinator>) -> Self {
        let period = Duration::from_secs(coordinator.config().heartbeat_interval);
        Self {
            coordinator,
            period,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn is_running(&self, group_id: &str) -> bool {
        self.tasks.read().await.contains_key(group_id)
    }

    pub async fn running_groups(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Start ticking `group_id` unless it already is. Returns true if a task was spawned.
    pub async fn ensure_group(&self, group_id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(group_id) {
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(tick_loop(
            self.coordinator.clone(),
            group_id.to_string(),
            self.period,
            shutdown_rx,
            self.tasks.clone(),
            id,
        ));
        tasks.insert(
            group_id.to_string(),
            TickTask {
                id,
                shutdown_tx,
                handle,
            },
        );
        tracing::debug!(group_id, period_secs = self.period.as_secs(), "heartbeat started");
        true
    }

    /// Stop one group's ticks. Returns false if none were running.
    pub async fn cancel(&self, group_id: &str) -> bool {
        let task = self.tasks.write().await.remove(group_id);
        match task {
            Some(task) => {
                let _ = task.shutdown_tx.send(());
                let _ = task.handle.await;
                tracing::debug!(group_id, "heartbeat cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop every tick task and wait for them to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, TickTask)> = self.tasks.write().await.drain().collect();
        let count = drained.len();
        let handles = drained.into_iter().map(|(_, task)| {
            let _ = task.shutdown_tx.send(());
            task.handle
        });
        futures::future::join_all(handles).await;
        tracing::info!(stopped = count, "heartbeat scheduler shut down");
    }
}

enum Wake {
    Shutdown,
    Tick,
    WatchDeadline,
    DeadlineChanged { open: bool },
}

async fn tick_loop(
    coordinator: Arc<SessionCoordinator>,
    group_id: String,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
    tasks: TaskMap,
    id: u64,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deadline_rx: Option<watch::Receiver<Option<Timestamp>>> = None;

    loop {
        if deadline_rx.is_none() {
            deadline_rx = coordinator.watch_deadlines(&group_id).await;
        }
        // one-shot timer for the watch window; re-armed whenever the deadline moves
        let watch_due = deadline_rx
            .as_mut()
            .and_then(|rx| *rx.borrow_and_update())
            .map(|deadline| {
                let wait = (deadline - coordinator.now()).max(0.0);
                Instant::now() + Duration::try_from_secs_f64(wait).unwrap_or(period)
            });

        let wake = tokio::select! {
            _ = &mut shutdown_rx => Wake::Shutdown,
            changed = async {
                match deadline_rx.as_mut() {
                    Some(rx) => rx.changed().await,
                    None => std::future::pending().await,
                }
            } => Wake::DeadlineChanged { open: changed.is_ok() },
            _ = tokio::time::sleep_until(watch_due.unwrap_or_else(Instant::now)), if watch_due.is_some() => {
                Wake::WatchDeadline
            }
            _ = interval.tick() => Wake::Tick,
        };

        let event = match wake {
            Wake::Shutdown => return,
            Wake::DeadlineChanged { open } => {
                if !open {
                    deadline_rx = None;
                }
                continue;
            }
            Wake::WatchDeadline => GroupEvent::WatchDeadline {
                group_id: group_id.clone(),
            },
            Wake::Tick => GroupEvent::HeartbeatTick {
                group_id: group_id.clone(),
            },
        };
        match coordinator.on_event(event).await {
            Ok(Outcome::Skipped(
                reason @ (SkipReason::Evicted
                | SkipReason::UnknownGroup
                | SkipReason::IneligibleGroup),
            )) => {
                tracing::debug!(group_id = %group_id, ?reason, "heartbeat stopping");
                break;
            }
            Ok(outcome) => {
                tracing::trace!(group_id = %group_id, ?outcome, "heartbeat wake");
            }
            Err(error) => {
                tracing::warn!(group_id = %group_id, %error, "heartbeat wake failed");
            }
        }
    }

    // self-terminated: unregister unless a newer task already took the slot
    let mut tasks = tasks.write().await;
    if tasks.get(&group_id).is_some_and(|t| t.id == id) {
        tasks.remove(&group_id);
    }
}
