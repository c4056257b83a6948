//! Repository for the `lab_sessions` table (the session factory).

use rvb_core::types::DbId;
use sqlx::PgPool;

use crate::models::lab_session::LabSession;
use crate::models::status::{RequestStatus, SessionStatus};

/// Column list for `lab_sessions` queries.
const COLUMNS: &str =
    "id, lab_id, attacker_user_id, defender_user_id, status_id, created_at";

pub struct LabSessionRepo;

impl LabSessionRepo {
    /// Insert one `active` session row.
    ///
    /// Not idempotent: calling this twice creates two sessions. Exactly-once
    /// creation per pairing is the coordinator's responsibility, enforced by
    /// the conditional claim on the counterpart request.
    pub async fn create(
        pool: &PgPool,
        lab_id: DbId,
        attacker_user_id: DbId,
        defender_user_id: DbId,
    ) -> Result<LabSession, sqlx::Error> {
        let query = format!(
            "INSERT INTO lab_sessions (lab_id, attacker_user_id, defender_user_id, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LabSession>(&query)
            .bind(lab_id)
            .bind(attacker_user_id)
            .bind(defender_user_id)
            .bind(SessionStatus::Active.id())
            .fetch_one(pool)
            .await
    }

    /// Find a session by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<LabSession>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM lab_sessions WHERE id = $1");
        sqlx::query_as::<_, LabSession>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Terminate a session: `active -> abandoned`.
    ///
    /// Conditional update; returns `false` when the session was already
    /// abandoned. Used both for explicit departure and for rolling back a
    /// session whose pairing lost the claim race.
    pub async fn mark_abandoned(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE lab_sessions SET status_id = $2 WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(SessionStatus::Abandoned.id())
        .bind(SessionStatus::Active.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Active sessions older than `older_than_secs` that fewer than two
    /// matched requests reference.
    ///
    /// These are the residue of a crash between session creation and the
    /// request updates (or of a failed lost-race rollback); the background
    /// sweep abandons them.
    pub async fn find_orphaned(
        pool: &PgPool,
        older_than_secs: i64,
    ) -> Result<Vec<LabSession>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM lab_sessions s \
             WHERE s.status_id = $1 \
               AND s.created_at < NOW() - make_interval(secs => $2::double precision) \
               AND (SELECT COUNT(*) FROM match_requests r \
                    WHERE r.session_id = s.id AND r.status_id = $3) < 2"
        );
        sqlx::query_as::<_, LabSession>(&query)
            .bind(SessionStatus::Active.id())
            .bind(older_than_secs)
            .bind(RequestStatus::Matched.id())
            .fetch_all(pool)
            .await
    }
}
