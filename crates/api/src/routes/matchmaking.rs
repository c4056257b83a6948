//! Route definitions for the `/matchmaking` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::matchmaking;
use crate::state::AppState;

/// Routes mounted at `/matchmaking`.
///
/// ```text
/// POST   /join              -> join
/// GET    /requests/{id}     -> get_request
/// DELETE /requests/{id}     -> cancel_request
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/join", post(matchmaking::join))
        .route(
            "/requests/{id}",
            get(matchmaking::get_request).delete(matchmaking::cancel_request),
        )
}
