//! Shared domain primitives for the Red vs Blue training platform.
//!
//! Everything here is dependency-light so that every other crate in the
//! workspace (database layer, matchmaker, API) can build on the same
//! vocabulary without pulling in sqlx or axum.

pub mod error;
pub mod team;
pub mod types;
