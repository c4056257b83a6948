//! Per-participant matchmaking state machine.
//!
//! One [`Coordinator`] runs for each participant who committed to a lab and
//! a team. It owns a cancellable polling loop against the shared store and
//! publishes [`Snapshot`]s of its progress through a watch channel; the two
//! participants' coordinators never talk to each other directly.
//!
//! Each poll tick performs two checks in a fixed priority order:
//!
//! 1. re-read the participant's own request — if a counterpart already
//!    claimed it, adopt that session;
//! 2. only then attempt to claim a counterpart as the initiator.
//!
//! Checking self first is what keeps a client from creating a duplicate
//! session when the other side has in fact already paired with it.

use std::sync::Arc;
use std::time::Duration;

use rvb_core::team::Team;
use rvb_core::types::DbId;
use rvb_db::models::match_request::{CreateMatchRequest, MatchRequest};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::{MatchStore, PairOutcome, StoreError};

/// Entry parameters handed in by the routing layer.
#[derive(Debug, Clone)]
pub struct MatchParams {
    pub lab_id: DbId,
    pub team: Team,
    pub user_id: DbId,
    pub username: String,
}

/// Polling cadence and the user-visible "partner found" pause before the
/// redirect fires.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    pub redirect_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            redirect_delay: Duration::from_millis(2000),
        }
    }
}

/// Where the state machine currently is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    /// Polling for a counterpart.
    Waiting,
    /// Paired; the redirect delay is running.
    Matched { session_id: DbId },
    /// Terminal: hand `(lab_id, session_id, team)` to the lab interface.
    Redirected {
        lab_id: DbId,
        session_id: DbId,
        team: Team,
    },
    /// Terminal: withdrawn before a match, locally or externally.
    Cancelled,
    /// Terminal: a fatal (authentication) failure stopped polling.
    Failed { message: String },
}

/// Published state of one coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub phase: Phase,
    pub request_id: DbId,
    pub partner_username: Option<String>,
    /// Set while the store is misbehaving transiently; polling continues.
    /// Cleared by the next successful tick.
    pub last_error: Option<String>,
}

/// Handle to a running coordinator task.
///
/// Dropping the handle does not stop the task; call [`shutdown`] (or
/// [`shutdown_and_wait`]) on teardown so the polling interval is cleared
/// and, if still waiting, the request is withdrawn.
///
/// [`shutdown`]: CoordinatorHandle::shutdown
/// [`shutdown_and_wait`]: CoordinatorHandle::shutdown_and_wait
pub struct CoordinatorHandle {
    request_id: DbId,
    state: watch::Receiver<Snapshot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn request_id(&self) -> DbId {
        self.request_id
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state.clone()
    }

    /// Request teardown. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Request teardown and wait for the task to finish its exit path
    /// (including the best-effort request withdrawal).
    pub async fn shutdown_and_wait(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    /// Whether the task has reached a terminal phase and exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct Coordinator {
    store: Arc<dyn MatchStore>,
    params: MatchParams,
    config: CoordinatorConfig,
    state: watch::Sender<Snapshot>,
}

enum Tick {
    KeepWaiting,
    Matched,
    CancelledExternally,
}

impl Coordinator {
    /// Resolve this participant's request (resuming an existing one where
    /// possible) and spawn the polling task.
    ///
    /// Errors here are entry errors only — once the handle is returned, all
    /// further trouble is reported through the snapshot.
    pub async fn start(
        store: Arc<dyn MatchStore>,
        params: MatchParams,
        config: CoordinatorConfig,
    ) -> Result<CoordinatorHandle, StoreError> {
        let request = Self::enter(store.as_ref(), &params).await?;

        tracing::info!(
            request_id = request.id,
            lab_id = params.lab_id,
            team = %params.team,
            user_id = params.user_id,
            resumed_session = ?request.session_id,
            "Matchmaking started"
        );

        let initial = Snapshot {
            phase: Phase::Waiting,
            request_id: request.id,
            partner_username: request.partner_username.clone(),
            last_error: None,
        };
        let (tx, rx) = watch::channel(initial);
        let cancel = CancellationToken::new();

        let coordinator = Coordinator {
            store,
            params,
            config,
            state: tx,
        };

        let request_id = request.id;
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            coordinator.run(request, task_cancel).await;
        });

        Ok(CoordinatorHandle {
            request_id,
            state: rx,
            cancel,
            task,
        })
    }

    /// The Requesting entry: reuse a live request if one exists, otherwise
    /// create one. Losing the create race to a concurrent entry for the
    /// same user resolves to the row that won.
    ///
    /// A matched request is only resumable while its session is still
    /// active; one pointing at a finished session (the partner left, or the
    /// pairing collapsed in a mutual-initiator race) is left behind and a
    /// fresh request is created instead.
    async fn enter(
        store: &dyn MatchStore,
        params: &MatchParams,
    ) -> Result<MatchRequest, StoreError> {
        if let Some(existing) = store
            .find_active_request(params.user_id, params.lab_id, params.team)
            .await?
        {
            if existing.is_waiting() {
                return Ok(existing);
            }
            if Self::session_is_active(store, &existing).await? {
                return Ok(existing);
            }
            tracing::debug!(
                request_id = existing.id,
                session_id = ?existing.session_id,
                "Previous match points at a finished session; requesting anew"
            );
        }

        let input = CreateMatchRequest {
            lab_id: params.lab_id,
            team: params.team,
            user_id: params.user_id,
            username: params.username.clone(),
        };

        match store.create_request(&input).await {
            Ok(request) => Ok(request),
            Err(e) if e.is_unique_violation() => store
                .find_active_request(params.user_id, params.lab_id, params.team)
                .await?
                .ok_or_else(|| {
                    StoreError::Unavailable(
                        "request disappeared between duplicate rejection and lookup".into(),
                    )
                }),
            Err(e) => Err(e),
        }
    }

    async fn run(self, mut request: MatchRequest, cancel: CancellationToken) {
        // Resume case: the request was already paired before we started
        // (page reload after a match) — no polling at all.
        if request.is_matched() && request.session_id.is_some() {
            self.finish_matched(&request, &cancel).await;
            return;
        }

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.withdraw(&request).await;
                    self.update(|s| s.phase = Phase::Cancelled);
                    return;
                }
                _ = interval.tick() => {
                    match self.tick(&mut request).await {
                        Ok(Tick::KeepWaiting) => {
                            self.update(|s| s.last_error = None);
                        }
                        Ok(Tick::Matched) => break,
                        Ok(Tick::CancelledExternally) => {
                            tracing::info!(request_id = request.id, "Request cancelled externally");
                            self.update(|s| s.phase = Phase::Cancelled);
                            return;
                        }
                        Err(e) if e.is_fatal() => {
                            tracing::error!(request_id = request.id, error = %e, "Fatal store error; matchmaking stopped");
                            self.update(|s| s.phase = Phase::Failed { message: e.to_string() });
                            return;
                        }
                        Err(e) => {
                            // Transient: surface a banner, keep the cadence.
                            tracing::warn!(request_id = request.id, error = %e, "Transient store error during matchmaking");
                            self.update(|s| s.last_error = Some(e.to_string()));
                        }
                    }
                }
            }
        }

        self.finish_matched(&request, &cancel).await;
    }

    /// One poll tick: own-status check first, then a claim attempt.
    async fn tick(&self, request: &mut MatchRequest) -> Result<Tick, StoreError> {
        let current = match self.store.get_request(request.id).await? {
            Some(row) => row,
            None => {
                // The row was flushed by an administrative sweep while we
                // waited. Start over with a fresh request.
                return self.re_enter(request, "own request disappeared").await;
            }
        };

        if current.is_cancelled() {
            return Ok(Tick::CancelledExternally);
        }

        if current.is_matched() {
            if Self::session_is_active(self.store.as_ref(), &current).await? {
                // The counterpart initiated and claimed us since our last
                // tick.
                *request = current;
                return Ok(Tick::Matched);
            }
            // Claimed into a session that did not survive (both sides
            // initiated at once and each rolled back the other's session).
            // The row cannot return to waiting, so start over.
            return self
                .re_enter(request, "claimed into a finished session")
                .await;
        }

        *request = current;

        match self.store.pair(request).await? {
            PairOutcome::Paired { session, partner } => {
                request.session_id = Some(session.id);
                request.partner_id = Some(partner.user_id);
                request.partner_username = Some(partner.username);
                Ok(Tick::Matched)
            }
            // Lost races resolve on a later tick; both are business as usual.
            PairOutcome::LostRace | PairOutcome::NoCounterpart => Ok(Tick::KeepWaiting),
        }
    }

    /// Whether a matched request's session still exists and is active.
    async fn session_is_active(
        store: &dyn MatchStore,
        request: &MatchRequest,
    ) -> Result<bool, StoreError> {
        let Some(session_id) = request.session_id else {
            return Ok(false);
        };
        Ok(store
            .get_session(session_id)
            .await?
            .map(|s| s.is_active())
            .unwrap_or(false))
    }

    /// Abandon the tracked request and start over with a fresh one.
    async fn re_enter(
        &self,
        request: &mut MatchRequest,
        reason: &str,
    ) -> Result<Tick, StoreError> {
        let fresh = Self::enter(self.store.as_ref(), &self.params).await?;
        tracing::info!(
            old_request_id = request.id,
            new_request_id = fresh.id,
            reason,
            "Re-entered matchmaking"
        );
        let resumed_into_match = fresh.is_matched() && fresh.session_id.is_some();
        *request = fresh;
        self.update(|s| s.request_id = request.id);
        Ok(if resumed_into_match {
            Tick::Matched
        } else {
            Tick::KeepWaiting
        })
    }

    /// Matched: announce the partner, hold for the confirmation delay, then
    /// emit the redirect triple. Teardown during the delay leaves the match
    /// intact (the request is no longer waiting, so nothing is withdrawn).
    async fn finish_matched(&self, request: &MatchRequest, cancel: &CancellationToken) {
        // The session id is always present on this path.
        let Some(session_id) = request.session_id else {
            self.update(|s| {
                s.phase = Phase::Failed {
                    message: "matched request carries no session".into(),
                }
            });
            return;
        };

        tracing::info!(
            request_id = request.id,
            session_id,
            partner = request.partner_username.as_deref().unwrap_or("unknown"),
            "Partner found"
        );

        self.update(|s| {
            s.phase = Phase::Matched { session_id };
            s.partner_username = request.partner_username.clone();
            s.last_error = None;
        });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.config.redirect_delay) => {}
        }

        self.update(|s| {
            s.phase = Phase::Redirected {
                lab_id: self.params.lab_id,
                session_id,
                team: self.params.team,
            }
        });
    }

    /// Best-effort withdrawal on teardown; a concurrent match wins over the
    /// cancel, which is fine — the row simply stays matched.
    async fn withdraw(&self, request: &MatchRequest) {
        match self.store.cancel_request(request.id).await {
            Ok(true) => {
                tracing::info!(request_id = request.id, "Request withdrawn");
            }
            Ok(false) => {
                tracing::debug!(request_id = request.id, "Nothing to withdraw; request already settled");
            }
            Err(e) => {
                tracing::warn!(request_id = request.id, error = %e, "Failed to withdraw request on teardown");
            }
        }
    }

    fn update(&self, mutate: impl FnOnce(&mut Snapshot)) {
        self.state.send_modify(mutate);
    }
}
