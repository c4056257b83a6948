//! Handlers for the `/matchmaking` resource.
//!
//! `join` spawns (or reattaches to) a [`Coordinator`] for the caller;
//! the poll and cancel endpoints operate on the registered handle. Identity
//! arrives in the request body from the out-of-scope auth layer.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rvb_core::error::CoreError;
use rvb_core::team::Team;
use rvb_core::types::DbId;
use rvb_db::models::match_request::MatchRequest;
use rvb_db::repositories::LabRepo;
use rvb_events::ChangeEvent;
use rvb_matchmaker::{Coordinator, MatchParams, Snapshot};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /matchmaking/join`.
#[derive(Debug, Deserialize, Validate)]
pub struct JoinMatchmaking {
    pub lab_id: DbId,
    pub team: Team,
    pub user_id: DbId,
    #[validate(length(min = 1, max = 64))]
    pub username: String,
}

/// Combined view returned by the poll endpoint: the stored row plus the
/// live coordinator phase (absent when no coordinator runs here, e.g.
/// after a server restart).
#[derive(Debug, Serialize)]
pub struct RequestStatus {
    pub request: Option<MatchRequest>,
    pub coordinator: Option<Snapshot>,
}

/// POST /api/v1/matchmaking/join
///
/// Find-or-create the caller's match request and start a coordinator for
/// it. Rejoining while a coordinator is already running returns the live
/// snapshot instead of spawning a second one.
pub async fn join(
    State(state): State<AppState>,
    Json(input): Json<JoinMatchmaking>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    LabRepo::find_by_id(&state.pool, input.lab_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Lab",
            id: input.lab_id,
        }))?;

    // Reattach: if this user's live request already has a coordinator in
    // this process, do not start a competing one.
    if let Some(existing) = state
        .store
        .find_active_request(input.user_id, input.lab_id, input.team)
        .await?
    {
        if state.registry.is_live(existing.id).await {
            let snapshot = state
                .registry
                .snapshot(existing.id)
                .await
                .ok_or_else(|| AppError::InternalError("coordinator vanished".into()))?;
            return Ok((StatusCode::OK, Json(DataResponse { data: snapshot })));
        }
    }

    let params = MatchParams {
        lab_id: input.lab_id,
        team: input.team,
        user_id: input.user_id,
        username: input.username.clone(),
    };
    let handle = Coordinator::start(
        Arc::clone(&state.store),
        params,
        state.config.coordinator_config(),
    )
    .await?;

    let snapshot = state
        .registry
        .attach(
            handle,
            Arc::clone(&state.store),
            Arc::clone(&state.event_bus),
            input.lab_id,
            state.config.watchdog_config(),
        )
        .await;

    tracing::info!(
        request_id = snapshot.request_id,
        lab_id = input.lab_id,
        team = %input.team,
        user_id = input.user_id,
        "Matchmaking joined",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: snapshot })))
}

/// GET /api/v1/matchmaking/requests/{id}
///
/// Poll a request: the stored row plus the coordinator phase, when one is
/// running in this process.
pub async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let request = state.store.get_request(request_id).await?;
    let coordinator = state.registry.snapshot(request_id).await;

    if request.is_none() && coordinator.is_none() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "MatchRequest",
            id: request_id,
        }));
    }

    Ok(Json(DataResponse {
        data: RequestStatus {
            request,
            coordinator,
        },
    }))
}

/// DELETE /api/v1/matchmaking/requests/{id}
///
/// Cancel a request. When a coordinator runs here it is torn down (which
/// withdraws the row); otherwise the row is cancelled directly with the
/// same conditional update. Cancelling an already-settled request reports
/// `cancelled: false` rather than an error.
pub async fn cancel_request(
    State(state): State<AppState>,
    Path(request_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let request = state
        .store
        .get_request(request_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "MatchRequest",
            id: request_id,
        }))?;

    let cancelled = if let Some(handle) = state.registry.take(request_id).await {
        handle.shutdown_and_wait().await;
        // The coordinator withdrew the row iff it was still waiting.
        state
            .store
            .get_request(request_id)
            .await?
            .is_some_and(|r| r.is_cancelled())
    } else {
        let changed = state.store.cancel_request(request_id).await?;
        if changed {
            state.event_bus.publish(
                ChangeEvent::new("matchmaking.cancelled")
                    .with_lab(request.lab_id)
                    .with_entity(request_id),
            );
        }
        changed
    };

    tracing::info!(request_id, cancelled, "Matchmaking cancel requested");

    Ok(Json(DataResponse {
        data: serde_json::json!({ "cancelled": cancelled }),
    }))
}
