//! Transactional pairing: counterpart lookup, session insert, and both
//! request claims committed as one atomic step.
//!
//! The step-by-step protocol (create session, then CAS each request) is
//! correct on its own but can leave a dangling active session if a client
//! dies between steps. When the store is PostgreSQL there is no reason to
//! accept that window: `FOR UPDATE SKIP LOCKED` serializes competing
//! initiators on the counterpart row and the whole pairing either commits
//! or vanishes on rollback.

use rvb_core::team::Team;
use rvb_core::types::DbId;
use sqlx::PgPool;

use crate::models::lab_session::LabSession;
use crate::models::match_request::MatchRequest;
use crate::models::status::{RequestStatus, SessionStatus};

const REQUEST_COLUMNS: &str = "\
    id, lab_id, team, user_id, username, status_id, \
    partner_id, partner_username, session_id, created_at, updated_at";

const SESSION_COLUMNS: &str =
    "id, lab_id, attacker_user_id, defender_user_id, status_id, created_at";

pub struct PairingRepo;

impl PairingRepo {
    /// Try to pair `own` (a waiting request) with a waiting counterpart.
    ///
    /// Returns `None` when no counterpart is currently available, when every
    /// candidate row is locked by a competing initiator (`SKIP LOCKED`), or
    /// when `own` stopped being `waiting` mid-flight — in the last case a
    /// concurrent initiator claimed the caller, whose next own-status poll
    /// will observe the match. In every `None` case nothing is committed.
    pub async fn pair_with_counterpart(
        pool: &PgPool,
        own: &MatchRequest,
    ) -> Result<Option<(LabSession, MatchRequest)>, sqlx::Error> {
        let team = Team::try_from(own.team)
            .map_err(|e| sqlx::Error::Decode(e.to_string().into()))?;

        let mut tx = pool.begin().await?;

        // Lock one waiting counterpart; competing initiators skip it.
        let counterpart_query = format!(
            "SELECT {REQUEST_COLUMNS} FROM match_requests \
             WHERE lab_id = $1 AND team = $2 AND status_id = $3 AND user_id <> $4 \
             ORDER BY created_at ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        );
        let counterpart = sqlx::query_as::<_, MatchRequest>(&counterpart_query)
            .bind(own.lab_id)
            .bind(team.opposite().id())
            .bind(RequestStatus::Waiting.id())
            .bind(own.user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(counterpart) = counterpart else {
            return Ok(None);
        };

        let (attacker_user_id, defender_user_id) = match team {
            Team::Attacker => (own.user_id, counterpart.user_id),
            Team::Defender => (counterpart.user_id, own.user_id),
        };

        let session_query = format!(
            "INSERT INTO lab_sessions (lab_id, attacker_user_id, defender_user_id, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {SESSION_COLUMNS}"
        );
        let session = sqlx::query_as::<_, LabSession>(&session_query)
            .bind(own.lab_id)
            .bind(attacker_user_id)
            .bind(defender_user_id)
            .bind(SessionStatus::Active.id())
            .fetch_one(&mut *tx)
            .await?;

        let claim_counterpart = sqlx::query(
            "UPDATE match_requests \
             SET status_id = $2, partner_id = $3, partner_username = $4, \
                 session_id = $5, updated_at = NOW() \
             WHERE id = $1 AND status_id = $6",
        )
        .bind(counterpart.id)
        .bind(RequestStatus::Matched.id())
        .bind(own.user_id)
        .bind(&own.username)
        .bind(session.id)
        .bind(RequestStatus::Waiting.id())
        .execute(&mut *tx)
        .await?;

        // The row is locked, so this can only fail if it was already
        // non-waiting when we selected it — which the WHERE excluded.
        if claim_counterpart.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let claim_own = sqlx::query(
            "UPDATE match_requests \
             SET status_id = $2, partner_id = $3, partner_username = $4, \
                 session_id = $5, updated_at = NOW() \
             WHERE id = $1 AND status_id = $6",
        )
        .bind(own.id)
        .bind(RequestStatus::Matched.id())
        .bind(counterpart.user_id)
        .bind(&counterpart.username)
        .bind(session.id)
        .bind(RequestStatus::Waiting.id())
        .execute(&mut *tx)
        .await?;

        // Our own row was claimed by someone else between our last poll and
        // now. Abort the whole pairing; the counterpart stays waiting and
        // the session insert is rolled back with the transaction.
        if claim_own.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;

        tracing::debug!(
            session_id = session.id,
            own_request = own.id,
            counterpart_request = counterpart.id,
            lab_id = own.lab_id,
            "Paired requests into session"
        );

        Ok(Some((session, counterpart)))
    }
}
