//! Row-change notification bus for the matchmaking tables.
//!
//! Subscribers (the WebSocket feed, mainly) receive a [`ChangeEvent`] when a
//! request or session row changes. This is a latency optimization layered on
//! top of the polling loops — the polling state machines remain the
//! correctness-bearing path and never depend on receiving an event.

pub mod bus;

pub use bus::{ChangeEvent, EventBus};
