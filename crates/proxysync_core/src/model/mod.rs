//! Wire and storage data model.
//!
//! # Responsibility
//! - Define the envelope exchanged between proxies, sessions, and servers.
//! - Keep one serde shape for transport, state cache, and snapshots.
//!
//! # Invariants
//! - Every object is addressed by a `GlobalId` that never changes.
//! - Full states and partial updates share the same `Message` shape.

pub mod message;
pub mod roster;
