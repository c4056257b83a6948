//! Repository for the `labs` table.
//!
//! Lab content is authored by an external tool; the matchmaking core only
//! lists and reads rows here. `create` exists for seeding and tests.

use rvb_core::types::DbId;
use sqlx::PgPool;

use crate::models::lab::{CreateLab, Lab};

/// Column list for `labs` queries.
const COLUMNS: &str =
    "id, name, description, attacker_briefing, defender_briefing, created_at";

pub struct LabRepo;

impl LabRepo {
    /// Insert a lab row.
    pub async fn create(pool: &PgPool, input: &CreateLab) -> Result<Lab, sqlx::Error> {
        let query = format!(
            "INSERT INTO labs (name, description, attacker_briefing, defender_briefing) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Lab>(&query)
            .bind(&input.name)
            .bind(&input.description)
            .bind(&input.attacker_briefing)
            .bind(&input.defender_briefing)
            .fetch_one(pool)
            .await
    }

    /// List all labs, newest first.
    pub async fn list(pool: &PgPool) -> Result<Vec<Lab>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM labs ORDER BY created_at DESC");
        sqlx::query_as::<_, Lab>(&query).fetch_all(pool).await
    }

    /// Find a lab by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Lab>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM labs WHERE id = $1");
        sqlx::query_as::<_, Lab>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
