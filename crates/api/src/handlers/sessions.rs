//! Handlers for the `/sessions` resource.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use rvb_core::error::CoreError;
use rvb_core::types::DbId;
use rvb_events::ChangeEvent;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/sessions/{id}
///
/// Session status; the browser-side watchdog polls this.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let session = state
        .store
        .get_session(session_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "LabSession",
            id: session_id,
        }))?;
    Ok(Json(DataResponse { data: session }))
}

/// POST /api/v1/sessions/{id}/leave
///
/// Mark the session abandoned (conditional `active -> abandoned`). Leaving
/// a session that already ended reports `abandoned: false`; the partner's
/// watchdog picks the transition up on its next poll either way.
pub async fn leave_session(
    State(state): State<AppState>,
    Path(session_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let session = state
        .store
        .get_session(session_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "LabSession",
            id: session_id,
        }))?;

    let abandoned = state.store.abandon_session(session_id).await?;
    if abandoned {
        state.event_bus.publish(
            ChangeEvent::new("lab_session.abandoned")
                .with_lab(session.lab_id)
                .with_entity(session_id),
        );
        tracing::info!(session_id, lab_id = session.lab_id, "Session abandoned");
    }

    Ok(Json(DataResponse {
        data: serde_json::json!({ "abandoned": abandoned }),
    }))
}
