//! Repository for the `match_requests` table.
//!
//! `mark_matched` and `cancel` are compare-and-swap updates on `status_id`;
//! `rows_affected() > 0` is the only synchronization verdict the pairing
//! protocol relies on. Callers that observe `false` lost a race and must
//! re-poll rather than retry the same write.

use rvb_core::team::Team;
use rvb_core::types::DbId;
use sqlx::PgPool;

use crate::models::match_request::{CreateMatchRequest, MatchRequest};
use crate::models::status::RequestStatus;

/// Column list for `match_requests` queries.
const COLUMNS: &str = "\
    id, lab_id, team, user_id, username, status_id, \
    partner_id, partner_username, session_id, created_at, updated_at";

pub struct MatchRequestRepo;

impl MatchRequestRepo {
    /// Insert a new `waiting` request.
    ///
    /// The partial unique index `uq_match_requests_waiting` rejects a second
    /// waiting row for the same `(user, lab, team)`; callers should look up
    /// an existing request with [`find_active`](Self::find_active) first and
    /// treat a unique violation here as "resume the existing row".
    pub async fn create(
        pool: &PgPool,
        input: &CreateMatchRequest,
    ) -> Result<MatchRequest, sqlx::Error> {
        let query = format!(
            "INSERT INTO match_requests (lab_id, team, user_id, username, status_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, MatchRequest>(&query)
            .bind(input.lab_id)
            .bind(input.team.id())
            .bind(input.user_id)
            .bind(&input.username)
            .bind(RequestStatus::Waiting.id())
            .fetch_one(pool)
            .await
    }

    /// Find this user's live request for a lab and team, if any.
    ///
    /// "Live" means `waiting` or `matched` — a page reload must resume the
    /// existing request (and, if it is already matched, its session) instead
    /// of creating a duplicate.
    pub async fn find_active(
        pool: &PgPool,
        user_id: DbId,
        lab_id: DbId,
        team: Team,
    ) -> Result<Option<MatchRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM match_requests \
             WHERE user_id = $1 AND lab_id = $2 AND team = $3 \
               AND status_id IN ($4, $5) \
             ORDER BY created_at DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, MatchRequest>(&query)
            .bind(user_id)
            .bind(lab_id)
            .bind(team.id())
            .bind(RequestStatus::Waiting.id())
            .bind(RequestStatus::Matched.id())
            .fetch_optional(pool)
            .await
    }

    /// Find a waiting request on the opposite team of the same lab,
    /// excluding the caller's own user.
    ///
    /// Selection among multiple candidates is first-come-first-served by
    /// `created_at`; no fairness guarantee beyond that.
    pub async fn find_waiting_counterpart(
        pool: &PgPool,
        lab_id: DbId,
        team: Team,
        exclude_user_id: DbId,
    ) -> Result<Option<MatchRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM match_requests \
             WHERE lab_id = $1 AND team = $2 AND status_id = $3 AND user_id <> $4 \
             ORDER BY created_at ASC \
             LIMIT 1"
        );
        sqlx::query_as::<_, MatchRequest>(&query)
            .bind(lab_id)
            .bind(team.opposite().id())
            .bind(RequestStatus::Waiting.id())
            .bind(exclude_user_id)
            .fetch_optional(pool)
            .await
    }

    /// Claim a request for a session: `waiting -> matched` with partner info.
    ///
    /// Conditional update. Returns `false` when the row was no longer
    /// `waiting`, meaning another writer claimed it first — the caller lost
    /// the race and must not keep any session it created for this pairing.
    pub async fn mark_matched(
        pool: &PgPool,
        id: DbId,
        partner_id: DbId,
        partner_username: &str,
        session_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE match_requests \
             SET status_id = $2, partner_id = $3, partner_username = $4, \
                 session_id = $5, updated_at = NOW() \
             WHERE id = $1 AND status_id = $6",
        )
        .bind(id)
        .bind(RequestStatus::Matched.id())
        .bind(partner_id)
        .bind(partner_username)
        .bind(session_id)
        .bind(RequestStatus::Waiting.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a request by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<MatchRequest>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM match_requests WHERE id = $1");
        sqlx::query_as::<_, MatchRequest>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Withdraw a request: `waiting -> cancelled`.
    ///
    /// Conditional update so that a concurrent match wins over a concurrent
    /// cancel. Returns `false` if the request was already matched or
    /// cancelled.
    pub async fn cancel(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE match_requests \
             SET status_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(RequestStatus::Cancelled.id())
        .bind(RequestStatus::Waiting.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of matched requests referencing a session. A healthy pairing
    /// has exactly two; the orphan sweep looks for fewer.
    pub async fn count_matched_for_session(
        pool: &PgPool,
        session_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM match_requests \
             WHERE session_id = $1 AND status_id = $2",
        )
        .bind(session_id)
        .bind(RequestStatus::Matched.id())
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }
}
