use std::sync::Arc;

use rvb_matchmaker::MatchStore;

use crate::config::ServerConfig;
use crate::registry::CoordinatorRegistry;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: rvb_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The shared store the pairing protocol runs on.
    pub store: Arc<dyn MatchStore>,
    /// Live coordinator and watchdog tasks, keyed by request/session id.
    pub registry: Arc<CoordinatorRegistry>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
    /// Centralized event bus feeding the WebSocket change feed.
    pub event_bus: Arc<rvb_events::EventBus>,
}
