//! PostgreSQL-backed [`MatchStore`] delegating to the repository layer.

use async_trait::async_trait;
use rvb_core::team::Team;
use rvb_core::types::DbId;
use rvb_db::models::lab_session::LabSession;
use rvb_db::models::match_request::{CreateMatchRequest, MatchRequest};
use rvb_db::repositories::{LabSessionRepo, MatchRequestRepo, PairingRepo};
use rvb_db::DbPool;

use crate::store::{MatchStore, PairOutcome, StoreError};

/// Production store over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgMatchStore {
    pool: DbPool,
}

impl PgMatchStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn find_active_request(
        &self,
        user_id: DbId,
        lab_id: DbId,
        team: Team,
    ) -> Result<Option<MatchRequest>, StoreError> {
        Ok(MatchRequestRepo::find_active(&self.pool, user_id, lab_id, team).await?)
    }

    async fn create_request(
        &self,
        input: &CreateMatchRequest,
    ) -> Result<MatchRequest, StoreError> {
        Ok(MatchRequestRepo::create(&self.pool, input).await?)
    }

    async fn get_request(&self, id: DbId) -> Result<Option<MatchRequest>, StoreError> {
        Ok(MatchRequestRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_waiting_counterpart(
        &self,
        lab_id: DbId,
        team: Team,
        exclude_user_id: DbId,
    ) -> Result<Option<MatchRequest>, StoreError> {
        Ok(
            MatchRequestRepo::find_waiting_counterpart(&self.pool, lab_id, team, exclude_user_id)
                .await?,
        )
    }

    async fn mark_matched(
        &self,
        id: DbId,
        partner_id: DbId,
        partner_username: &str,
        session_id: DbId,
    ) -> Result<bool, StoreError> {
        Ok(
            MatchRequestRepo::mark_matched(&self.pool, id, partner_id, partner_username, session_id)
                .await?,
        )
    }

    async fn cancel_request(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(MatchRequestRepo::cancel(&self.pool, id).await?)
    }

    async fn create_session(
        &self,
        lab_id: DbId,
        attacker_user_id: DbId,
        defender_user_id: DbId,
    ) -> Result<LabSession, StoreError> {
        Ok(LabSessionRepo::create(&self.pool, lab_id, attacker_user_id, defender_user_id).await?)
    }

    async fn get_session(&self, id: DbId) -> Result<Option<LabSession>, StoreError> {
        Ok(LabSessionRepo::find_by_id(&self.pool, id).await?)
    }

    async fn abandon_session(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(LabSessionRepo::mark_abandoned(&self.pool, id).await?)
    }

    /// Transactional pairing: counterpart lock, session insert, and both
    /// claims commit or roll back as one step, so no lost-race session ever
    /// exists for anyone to observe. `SKIP LOCKED` turns a competing
    /// initiator's lock into "no counterpart right now" rather than a wait.
    async fn pair(&self, own: &MatchRequest) -> Result<PairOutcome, StoreError> {
        match PairingRepo::pair_with_counterpart(&self.pool, own).await? {
            Some((session, partner)) => Ok(PairOutcome::Paired { session, partner }),
            None => Ok(PairOutcome::NoCounterpart),
        }
    }
}
