//! Abandonment detection for a joined lab session.
//!
//! A participant inside a session learns that the other side left the same
//! way everything else here works: by polling the shared row. The watchdog
//! re-reads the session on an interval and, once it stops being `active`,
//! holds for a short grace period (the partner may be mid-reconnect) before
//! declaring the session expired.

use std::sync::Arc;
use std::time::Duration;

use rvb_core::types::DbId;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::MatchStore;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub poll_interval: Duration,
    /// How long a non-active session may linger before [`SessionView::Expired`]
    /// is announced.
    pub grace: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            grace: Duration::from_secs(3),
        }
    }
}

/// What the watchdog currently believes about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionView {
    Active,
    /// The row left `active` (or vanished); the grace period is running.
    Abandoned,
    /// Terminal: the grace period elapsed without the session coming back.
    Expired,
}

/// Handle to a running watchdog task.
pub struct WatchdogHandle {
    state: watch::Receiver<SessionView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn view(&self) -> SessionView {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.state.clone()
    }

    /// Stop watching. Idempotent; the session row is left untouched.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn stop_and_wait(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct SessionWatchdog;

impl SessionWatchdog {
    /// Watch `session_id` until it expires or the handle is stopped.
    pub fn spawn(
        store: Arc<dyn MatchStore>,
        session_id: DbId,
        config: WatchdogConfig,
    ) -> WatchdogHandle {
        let (tx, rx) = watch::channel(SessionView::Active);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            run(store, session_id, config, tx, task_cancel).await;
        });

        WatchdogHandle {
            state: rx,
            cancel,
            task,
        }
    }
}

async fn run(
    store: Arc<dyn MatchStore>,
    session_id: DbId,
    config: WatchdogConfig,
    state: watch::Sender<SessionView>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(session_id, "Session watchdog stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let active = match store.get_session(session_id).await {
            // A missing row means the session was flushed; treat it the
            // same as an abandoned one.
            Ok(row) => row.map(|s| s.is_active()).unwrap_or(false),
            Err(e) if !e.is_fatal() => {
                tracing::warn!(session_id, error = %e, "Transient store error in session watchdog");
                continue;
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "Fatal store error; session watchdog stopped");
                return;
            }
        };

        if active {
            continue;
        }

        tracing::info!(session_id, grace = ?config.grace, "Session no longer active; grace period started");
        let _ = state.send(SessionView::Abandoned);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.grace) => {}
        }

        // One confirming read after the grace period. A session that came
        // back (an administrative restore) resumes normal watching.
        match store.get_session(session_id).await {
            Ok(Some(row)) if row.is_active() => {
                tracing::info!(session_id, "Session active again after grace period");
                let _ = state.send(SessionView::Active);
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Confirming read failed; treating session as expired");
            }
        }

        tracing::info!(session_id, "Session expired");
        let _ = state.send(SessionView::Expired);
        return;
    }
}
