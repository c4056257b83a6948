//! The store seam between the coordinator and whatever holds the shared
//! rows.
//!
//! Every cross-participant coordination step must reduce to one of these
//! primitives, and the only mutation that decides a race is a conditional
//! update (`mark_matched`, `cancel_request`, `abandon_session` all return
//! whether the expected-state guard held). The provided [`pair`] method
//! implements the initiator sequence on top of the primitives; stores with
//! real transactions override it.
//!
//! [`pair`]: MatchStore::pair

use async_trait::async_trait;
use rvb_core::team::Team;
use rvb_core::types::DbId;
use rvb_db::models::lab_session::LabSession;
use rvb_db::models::match_request::{CreateMatchRequest, MatchRequest};

/// Errors surfaced by a [`MatchStore`].
///
/// The repository layer never retries or swallows; the coordinator is the
/// only layer that decides what is transient and what is fatal.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The caller's credentials were rejected. Fatal: polling must stop.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The store could not be reached or refused the operation. Transient:
    /// callers keep their polling cadence and try again next tick.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The write collided with an existing row (waiting-request uniqueness).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A database-level failure.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether this error must stop the polling loop.
    ///
    /// Only authentication failures qualify; everything else is treated as
    /// transient and retried on the next tick. PostgreSQL surfaces auth
    /// problems as SQLSTATE class 28.
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Auth(_) => true,
            StoreError::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .map(|code| code.starts_with("28"))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether this error is the store rejecting a duplicate waiting
    /// request, in which case the existing row should be resumed.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Database(sqlx::Error::Database(db_err)) => {
                db_err.code().as_deref() == Some("23505")
            }
            _ => false,
        }
    }
}

/// Result of one pairing attempt by an initiator.
#[derive(Debug)]
pub enum PairOutcome {
    /// A counterpart was claimed; both rows now reference `session`.
    Paired {
        session: LabSession,
        partner: MatchRequest,
    },
    /// A counterpart was seen but another initiator claimed it first. Any
    /// session created for the attempt has been discarded.
    LostRace,
    /// Nobody compatible is waiting right now.
    NoCounterpart,
}

/// Storage primitives the pairing protocol runs on.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// A user's live (`waiting` or `matched`) request for a lab/team, if any.
    async fn find_active_request(
        &self,
        user_id: DbId,
        lab_id: DbId,
        team: Team,
    ) -> Result<Option<MatchRequest>, StoreError>;

    /// Insert a new `waiting` request.
    async fn create_request(
        &self,
        input: &CreateMatchRequest,
    ) -> Result<MatchRequest, StoreError>;

    /// Re-read a request by id.
    async fn get_request(&self, id: DbId) -> Result<Option<MatchRequest>, StoreError>;

    /// An arbitrary waiting request on the opposite team of `team` for the
    /// same lab, excluding `exclude_user_id`.
    async fn find_waiting_counterpart(
        &self,
        lab_id: DbId,
        team: Team,
        exclude_user_id: DbId,
    ) -> Result<Option<MatchRequest>, StoreError>;

    /// Conditional `waiting -> matched` claim. `Ok(false)` means another
    /// writer already transitioned the row: the caller lost the race.
    async fn mark_matched(
        &self,
        id: DbId,
        partner_id: DbId,
        partner_username: &str,
        session_id: DbId,
    ) -> Result<bool, StoreError>;

    /// Conditional `waiting -> cancelled` withdrawal.
    async fn cancel_request(&self, id: DbId) -> Result<bool, StoreError>;

    /// Insert one `active` session. Not idempotent; exactly-once creation is
    /// enforced by the claim in [`pair`](MatchStore::pair), not here.
    async fn create_session(
        &self,
        lab_id: DbId,
        attacker_user_id: DbId,
        defender_user_id: DbId,
    ) -> Result<LabSession, StoreError>;

    /// Read a session by id.
    async fn get_session(&self, id: DbId) -> Result<Option<LabSession>, StoreError>;

    /// Conditional `active -> abandoned` termination.
    async fn abandon_session(&self, id: DbId) -> Result<bool, StoreError>;

    /// Attempt to pair `own` (a waiting request) with a counterpart, acting
    /// as the initiator.
    ///
    /// Default implementation, for stores whose only atomic step is the
    /// single-row conditional update:
    ///
    /// 1. look up a waiting counterpart — none means [`NoCounterpart`];
    /// 2. create the session;
    /// 3. conditionally claim the counterpart's row. If the claim misses,
    ///    some other initiator got there first: abandon the session just
    ///    created (no orphan may stay active) and report [`LostRace`];
    /// 4. claim `own`'s row, attaching the same session and the partner's
    ///    identity.
    ///
    /// The sequence is not atomic across rows; a crash between steps leaves
    /// a half-paired session for the reconciliation sweep. Transactional
    /// stores override this with a genuinely atomic version.
    ///
    /// [`NoCounterpart`]: PairOutcome::NoCounterpart
    /// [`LostRace`]: PairOutcome::LostRace
    async fn pair(&self, own: &MatchRequest) -> Result<PairOutcome, StoreError> {
        let team = Team::try_from(own.team)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let Some(counterpart) = self
            .find_waiting_counterpart(own.lab_id, team, own.user_id)
            .await?
        else {
            return Ok(PairOutcome::NoCounterpart);
        };

        let (attacker_user_id, defender_user_id) = match team {
            Team::Attacker => (own.user_id, counterpart.user_id),
            Team::Defender => (counterpart.user_id, own.user_id),
        };

        let session = self
            .create_session(own.lab_id, attacker_user_id, defender_user_id)
            .await?;

        let claimed = self
            .mark_matched(counterpart.id, own.user_id, &own.username, session.id)
            .await?;

        if !claimed {
            // Someone else paired with this counterpart between our lookup
            // and our claim. The session we created must not survive.
            match self.abandon_session(session.id).await {
                Ok(_) => {
                    tracing::debug!(
                        session_id = session.id,
                        counterpart_request = counterpart.id,
                        "Lost claim race; rolled back session"
                    );
                }
                Err(e) => {
                    // The orphaned active session is now the sweep's problem.
                    tracing::error!(
                        session_id = session.id,
                        error = %e,
                        "Lost claim race and session rollback failed"
                    );
                }
            }
            return Ok(PairOutcome::LostRace);
        }

        let own_claimed = self
            .mark_matched(own.id, counterpart.user_id, &counterpart.username, session.id)
            .await?;

        if !own_claimed {
            // A third party matched us while we were claiming the
            // counterpart. Follow the session on our own row (the next
            // own-status poll picks it up) and terminate the one we
            // created; the counterpart's watchdog will observe the
            // abandonment.
            if let Err(e) = self.abandon_session(session.id).await {
                tracing::error!(
                    session_id = session.id,
                    error = %e,
                    "Own claim raced and session rollback failed"
                );
            }
            return Ok(PairOutcome::LostRace);
        }

        Ok(PairOutcome::Paired {
            session,
            partner: counterpart,
        })
    }
}
