//! Match request models: one participant's declared intent to play a
//! specific lab on a specific side.

use rvb_core::team::{Team, TeamId};
use rvb_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{RequestStatus, StatusId};

/// A row from the `match_requests` table.
///
/// While `status_id` is `Waiting` the partner columns and `session_id` are
/// null; once the row is `Matched` all three are set and both requests of a
/// pair reference the same session.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MatchRequest {
    pub id: DbId,
    pub lab_id: DbId,
    pub team: TeamId,
    pub user_id: DbId,
    pub username: String,
    pub status_id: StatusId,
    pub partner_id: Option<DbId>,
    pub partner_username: Option<String>,
    pub session_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MatchRequest {
    pub fn is_waiting(&self) -> bool {
        self.status_id == RequestStatus::Waiting.id()
    }

    pub fn is_matched(&self) -> bool {
        self.status_id == RequestStatus::Matched.id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status_id == RequestStatus::Cancelled.id()
    }
}

/// DTO for inserting a new waiting request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMatchRequest {
    pub lab_id: DbId,
    pub team: Team,
    pub user_id: DbId,
    pub username: String,
}
