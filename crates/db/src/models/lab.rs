//! Lab catalog models. The matchmaking core treats labs as read-only.

use rvb_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `labs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Lab {
    pub id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub attacker_briefing: Option<String>,
    pub defender_briefing: Option<String>,
    pub created_at: Timestamp,
}

/// DTO for inserting a lab (seeding and content tooling).
#[derive(Debug, Deserialize)]
pub struct CreateLab {
    pub name: String,
    pub description: Option<String>,
    pub attacker_briefing: Option<String>,
    pub defender_briefing: Option<String>,
}
