//! Request handlers, grouped by resource.

pub mod labs;
pub mod matchmaking;
pub mod sessions;
