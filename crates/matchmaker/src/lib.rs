//! Peer-discovered matchmaking for Red vs Blue lab sessions.
//!
//! Two participants who picked the same lab on opposite teams find each
//! other without a central matchmaking process: each runs a [`Coordinator`]
//! — a polling state machine — against the same store, and the only
//! synchronization primitive is the conditional `waiting -> matched` update
//! on a request row. Whichever side's conditional update lands first wins
//! the pairing; the loser discards any session it created and keeps
//! polling.
//!
//! The store seam is the [`MatchStore`](store::MatchStore) trait:
//! [`PgMatchStore`](pg::PgMatchStore) backs it with PostgreSQL (where the
//! whole pairing additionally collapses into one transaction), and
//! [`MemoryStore`](memory::MemoryStore) backs it with a mutex-guarded map
//! for tests and local tooling.

pub mod coordinator;
pub mod memory;
pub mod pg;
pub mod store;
pub mod watchdog;

pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorHandle, MatchParams, Phase, Snapshot,
};
pub use pg::PgMatchStore;
pub use store::{MatchStore, PairOutcome, StoreError};
pub use watchdog::{SessionView, SessionWatchdog, WatchdogConfig, WatchdogHandle};
