//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define snapshot data access contracts.
//! - Isolate SQLite query details from session orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.

pub mod snapshot_repo;
