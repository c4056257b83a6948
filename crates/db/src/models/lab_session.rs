//! Lab session models: the live paired engagement between exactly one
//! attacker and one defender.

use rvb_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::{SessionStatus, StatusId};

/// A row from the `lab_sessions` table.
///
/// The attacker and defender user ids are distinct (database CHECK) and
/// fixed for the lifetime of the session.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LabSession {
    pub id: DbId,
    pub lab_id: DbId,
    pub attacker_user_id: DbId,
    pub defender_user_id: DbId,
    pub status_id: StatusId,
    pub created_at: Timestamp,
}

impl LabSession {
    pub fn is_active(&self) -> bool {
        self.status_id == SessionStatus::Active.id()
    }

    pub fn is_abandoned(&self) -> bool {
        self.status_id == SessionStatus::Abandoned.id()
    }
}
