pub mod health;
pub mod labs;
pub mod matchmaking;
pub mod sessions;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                                WebSocket change feed (?lab_id= filter)
///
/// /labs                              list (GET)
/// /labs/{id}                         get (GET)
///
/// /matchmaking/join                  join (POST)
/// /matchmaking/requests/{id}         poll (GET), cancel (DELETE)
///
/// /sessions/{id}                     status (GET)
/// /sessions/{id}/leave               leave (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/labs", labs::router())
        .nest("/matchmaking", matchmaking::router())
        .nest("/sessions", sessions::router())
}
