//! Route definitions for the read-only `/labs` catalog.

use axum::routing::get;
use axum::Router;

use crate::handlers::labs;
use crate::state::AppState;

/// Routes mounted at `/labs`.
///
/// ```text
/// GET    /          -> list_labs
/// GET    /{id}      -> get_lab
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(labs::list_labs))
        .route("/{id}", get(labs::get_lab))
}
