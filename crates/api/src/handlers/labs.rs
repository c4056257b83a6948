//! Handlers for the read-only `/labs` catalog.
//!
//! Lab content is authored elsewhere; the matchmaking service only lists
//! what can be joined.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use rvb_core::error::CoreError;
use rvb_core::types::DbId;
use rvb_db::repositories::LabRepo;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/labs
///
/// List all labs, newest first.
pub async fn list_labs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let labs = LabRepo::list(&state.pool).await?;
    Ok(Json(DataResponse { data: labs }))
}

/// GET /api/v1/labs/{id}
pub async fn get_lab(
    State(state): State<AppState>,
    Path(lab_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let lab = LabRepo::find_by_id(&state.pool, lab_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Lab",
            id: lab_id,
        }))?;
    Ok(Json(DataResponse { data: lab }))
}
