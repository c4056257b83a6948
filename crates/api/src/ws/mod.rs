//! WebSocket change feed.
//!
//! Browser clients open `/api/v1/ws?lab_id={id}` to receive [`ChangeEvent`]s
//! for the lab they are looking at. Delivery is best-effort; every client
//! also polls, so a dropped or lagged event costs latency, not correctness.
//!
//! [`ChangeEvent`]: rvb_events::ChangeEvent

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
