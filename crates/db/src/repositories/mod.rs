//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument. Every mutation that matters
//! for pairing correctness is a conditional update guarded by the expected
//! prior status, never an unconditional overwrite.

pub mod lab_repo;
pub mod lab_session_repo;
pub mod match_request_repo;
pub mod pairing_repo;

pub use lab_repo::LabRepo;
pub use lab_session_repo::LabSessionRepo;
pub use match_request_repo::MatchRequestRepo;
pub use pairing_repo::PairingRepo;
