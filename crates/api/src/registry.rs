//! Registry of live coordinator and watchdog tasks.
//!
//! The HTTP surface is stateless per request, but each joined participant
//! owns a running [`CoordinatorHandle`]; the registry keys them by request
//! id so poll and cancel endpoints attach to the running state machine.
//! It also bridges task state onto the [`EventBus`]: every phase change and
//! watchdog observation is published for the WebSocket feed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rvb_core::types::DbId;
use rvb_events::{ChangeEvent, EventBus};
use rvb_matchmaker::{
    CoordinatorHandle, MatchStore, Phase, SessionView, SessionWatchdog, Snapshot, WatchdogConfig,
    WatchdogHandle,
};
use tokio::sync::RwLock;

/// How long a terminal coordinator stays pollable before it is evicted.
const DEFAULT_COORDINATOR_RETENTION: Duration = Duration::from_secs(30);

pub struct CoordinatorRegistry {
    coordinators: RwLock<HashMap<DbId, CoordinatorHandle>>,
    /// Watchdogs keyed by session id; deduplicates the case where both
    /// participants of a session are served by this process.
    watchdogs: RwLock<HashMap<DbId, WatchdogHandle>>,
    /// Grace before a finished coordinator is dropped from the map, so a
    /// client's final poll can still observe the terminal snapshot.
    retention: Duration,
}

impl Default for CoordinatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_COORDINATOR_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            coordinators: RwLock::new(HashMap::new()),
            watchdogs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Register a freshly started coordinator and start forwarding its
    /// phase changes onto the event bus.
    pub async fn attach(
        self: &Arc<Self>,
        handle: CoordinatorHandle,
        store: Arc<dyn MatchStore>,
        bus: Arc<EventBus>,
        lab_id: DbId,
        watchdog_config: WatchdogConfig,
    ) -> Snapshot {
        let request_id = handle.request_id();
        let snapshot = handle.snapshot();
        let rx = handle.subscribe();
        self.coordinators.write().await.insert(request_id, handle);

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = rx;
            loop {
                let snapshot = rx.borrow_and_update().clone();
                bus.publish(
                    ChangeEvent::new(phase_event_type(&snapshot.phase))
                        .with_lab(lab_id)
                        .with_entity(snapshot.request_id)
                        .with_payload(
                            serde_json::to_value(&snapshot).unwrap_or_default(),
                        ),
                );

                if let Phase::Matched { session_id } | Phase::Redirected { session_id, .. } =
                    snapshot.phase
                {
                    registry
                        .watch_session(
                            Arc::clone(&store),
                            Arc::clone(&bus),
                            session_id,
                            lab_id,
                            watchdog_config.clone(),
                        )
                        .await;
                }

                if matches!(
                    snapshot.phase,
                    Phase::Redirected { .. } | Phase::Cancelled | Phase::Failed { .. }
                ) {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }

            // Keep the terminal snapshot pollable briefly, then drop the
            // entry so finished coordinators do not accumulate. A rejoin may
            // have registered a fresh handle under the same request id in the
            // meantime; only a finished one is evicted.
            tokio::time::sleep(registry.retention).await;
            let mut coordinators = registry.coordinators.write().await;
            if coordinators
                .get(&request_id)
                .is_some_and(|h| h.is_finished())
            {
                coordinators.remove(&request_id);
                tracing::debug!(request_id, "Evicted finished coordinator");
            }
        });

        snapshot
    }

    /// Start a watchdog for `session_id` unless one is already running, and
    /// forward what it observes onto the event bus.
    pub async fn watch_session(
        self: &Arc<Self>,
        store: Arc<dyn MatchStore>,
        bus: Arc<EventBus>,
        session_id: DbId,
        lab_id: DbId,
        config: WatchdogConfig,
    ) {
        let mut watchdogs = self.watchdogs.write().await;
        if let Some(existing) = watchdogs.get(&session_id) {
            if !existing.is_finished() {
                return;
            }
        }

        let handle = SessionWatchdog::spawn(store, session_id, config);
        let mut rx = handle.subscribe();
        watchdogs.insert(session_id, handle);
        drop(watchdogs);

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let view = *rx.borrow_and_update();
                let event_type = match view {
                    SessionView::Active => continue,
                    SessionView::Abandoned => "lab_session.abandoned",
                    SessionView::Expired => "lab_session.expired",
                };
                bus.publish(
                    ChangeEvent::new(event_type)
                        .with_lab(lab_id)
                        .with_entity(session_id),
                );
                if view == SessionView::Expired {
                    registry.watchdogs.write().await.remove(&session_id);
                    return;
                }
            }
        });
    }

    /// Snapshot of a live (or finished-but-retained) coordinator.
    pub async fn snapshot(&self, request_id: DbId) -> Option<Snapshot> {
        self.coordinators
            .read()
            .await
            .get(&request_id)
            .map(|h| h.snapshot())
    }

    /// Whether a coordinator for this request is registered and still
    /// running.
    pub async fn is_live(&self, request_id: DbId) -> bool {
        self.coordinators
            .read()
            .await
            .get(&request_id)
            .is_some_and(|h| !h.is_finished())
    }

    /// Remove and return the coordinator for a request, if any.
    pub async fn take(&self, request_id: DbId) -> Option<CoordinatorHandle> {
        self.coordinators.write().await.remove(&request_id)
    }

    pub async fn coordinator_count(&self) -> usize {
        self.coordinators.read().await.len()
    }

    /// Tear down every registered task; waiting coordinators withdraw their
    /// requests on the way out.
    pub async fn shutdown_all(&self) {
        let coordinators: Vec<_> = {
            let mut map = self.coordinators.write().await;
            map.drain().map(|(_, h)| h).collect()
        };
        let count = coordinators.len();
        for handle in coordinators {
            handle.shutdown_and_wait().await;
        }

        let watchdogs: Vec<_> = {
            let mut map = self.watchdogs.write().await;
            map.drain().map(|(_, h)| h).collect()
        };
        for handle in watchdogs {
            handle.stop_and_wait().await;
        }
        tracing::info!(count, "Coordinator registry shut down");
    }
}

fn phase_event_type(phase: &Phase) -> &'static str {
    match phase {
        Phase::Waiting => "matchmaking.waiting",
        Phase::Matched { .. } => "matchmaking.matched",
        Phase::Redirected { .. } => "matchmaking.redirected",
        Phase::Cancelled => "matchmaking.cancelled",
        Phase::Failed { .. } => "matchmaking.failed",
    }
}
