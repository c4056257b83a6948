//! Mutex-guarded in-memory [`MatchStore`].
//!
//! Backs the protocol tests (where it exercises the default, non-atomic
//! [`MatchStore::pair`] sequence including its rollback path) and is handy
//! for running the stack without a database. Each primitive takes the lock
//! once, mirroring the single-row granularity of the real store: the
//! interleavings between primitives are exactly the race windows the
//! protocol must survive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rvb_core::team::Team;
use rvb_core::types::DbId;
use rvb_db::models::lab_session::LabSession;
use rvb_db::models::match_request::{CreateMatchRequest, MatchRequest};
use rvb_db::models::status::{RequestStatus, SessionStatus};
use tokio::sync::Mutex;

use crate::store::{MatchStore, StoreError};

#[derive(Default)]
struct Inner {
    requests: HashMap<DbId, MatchRequest>,
    sessions: HashMap<DbId, LabSession>,
    next_id: DbId,
}

impl Inner {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Number of upcoming operations that should fail as unavailable.
    fail_ops: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store operations fail with a transient error.
    pub fn fail_next_ops(&self, n: usize) {
        self.fail_ops.store(n, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        let remaining = self
            .fail_ops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if remaining {
            Err(StoreError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }

    /// Delete a request row outright, the way an administrative flush does.
    pub async fn remove_request(&self, id: DbId) -> bool {
        self.inner.lock().await.requests.remove(&id).is_some()
    }

    /// Sessions currently in `active` status (test inspection).
    pub async fn active_session_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.sessions.values().filter(|s| s.is_active()).count()
    }

    /// Total sessions ever created (test inspection).
    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn find_active_request(
        &self,
        user_id: DbId,
        lab_id: DbId,
        team: Team,
    ) -> Result<Option<MatchRequest>, StoreError> {
        self.check_failure()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .requests
            .values()
            .filter(|r| {
                r.user_id == user_id
                    && r.lab_id == lab_id
                    && r.team == team.id()
                    && (r.is_waiting() || r.is_matched())
            })
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn create_request(
        &self,
        input: &CreateMatchRequest,
    ) -> Result<MatchRequest, StoreError> {
        self.check_failure()?;
        let mut inner = self.inner.lock().await;

        // Mirror of the store-level partial unique index.
        let duplicate = inner.requests.values().any(|r| {
            r.user_id == input.user_id
                && r.lab_id == input.lab_id
                && r.team == input.team.id()
                && r.is_waiting()
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "waiting request already exists for user {} on lab {}",
                input.user_id, input.lab_id
            )));
        }

        let now = Utc::now();
        let id = inner.next_id();
        let request = MatchRequest {
            id,
            lab_id: input.lab_id,
            team: input.team.id(),
            user_id: input.user_id,
            username: input.username.clone(),
            status_id: RequestStatus::Waiting.id(),
            partner_id: None,
            partner_username: None,
            session_id: None,
            created_at: now,
            updated_at: now,
        };
        inner.requests.insert(id, request.clone());
        Ok(request)
    }

    async fn get_request(&self, id: DbId) -> Result<Option<MatchRequest>, StoreError> {
        self.check_failure()?;
        Ok(self.inner.lock().await.requests.get(&id).cloned())
    }

    async fn find_waiting_counterpart(
        &self,
        lab_id: DbId,
        team: Team,
        exclude_user_id: DbId,
    ) -> Result<Option<MatchRequest>, StoreError> {
        self.check_failure()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .requests
            .values()
            .filter(|r| {
                r.lab_id == lab_id
                    && r.team == team.opposite().id()
                    && r.is_waiting()
                    && r.user_id != exclude_user_id
            })
            .min_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn mark_matched(
        &self,
        id: DbId,
        partner_id: DbId,
        partner_username: &str,
        session_id: DbId,
    ) -> Result<bool, StoreError> {
        self.check_failure()?;
        let mut inner = self.inner.lock().await;
        match inner.requests.get_mut(&id) {
            Some(request) if request.is_waiting() => {
                request.status_id = RequestStatus::Matched.id();
                request.partner_id = Some(partner_id);
                request.partner_username = Some(partner_username.to_string());
                request.session_id = Some(session_id);
                request.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_request(&self, id: DbId) -> Result<bool, StoreError> {
        self.check_failure()?;
        let mut inner = self.inner.lock().await;
        match inner.requests.get_mut(&id) {
            Some(request) if request.is_waiting() => {
                request.status_id = RequestStatus::Cancelled.id();
                request.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_session(
        &self,
        lab_id: DbId,
        attacker_user_id: DbId,
        defender_user_id: DbId,
    ) -> Result<LabSession, StoreError> {
        self.check_failure()?;
        if attacker_user_id == defender_user_id {
            return Err(StoreError::Conflict(
                "attacker and defender must be distinct users".into(),
            ));
        }
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let session = LabSession {
            id,
            lab_id,
            attacker_user_id,
            defender_user_id,
            status_id: SessionStatus::Active.id(),
            created_at: Utc::now(),
        };
        inner.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: DbId) -> Result<Option<LabSession>, StoreError> {
        self.check_failure()?;
        Ok(self.inner.lock().await.sessions.get(&id).cloned())
    }

    async fn abandon_session(&self, id: DbId) -> Result<bool, StoreError> {
        self.check_failure()?;
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&id) {
            Some(session) if session.is_active() => {
                session.status_id = SessionStatus::Abandoned.id();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
