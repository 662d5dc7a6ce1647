//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into session-level use cases.
//! - Keep callers decoupled from storage details.

pub mod snapshot_service;
