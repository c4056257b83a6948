//! Route definitions for the `/sessions` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::sessions;
use crate::state::AppState;

/// Routes mounted at `/sessions`.
///
/// ```text
/// GET    /{id}          -> get_session
/// POST   /{id}/leave    -> leave_session
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(sessions::get_session))
        .route("/{id}/leave", post(sessions::leave_session))
}
