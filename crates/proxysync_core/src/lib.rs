//! Client-side proxy synchronization core.
//!
//! Keeps local proxies and their server counterparts in agreement through
//! state messages, rebuilds object graphs on demand from stored state, records
//! undoable changes, and tracks collaboration roles between clients.

pub mod collaboration;
pub mod db;
pub mod error;
pub mod locator;
pub mod logging;
pub mod model;
pub mod proxy;
pub mod remote;
pub mod repo;
pub mod service;
pub mod session;
pub mod undo;

pub use collaboration::{CollaborationEvent, CollaborationManager};
pub use error::{SyncError, SyncResult};
pub use locator::deserializer::Deserializer;
pub use locator::proxy_locator::ProxyLocator;
pub use locator::state_locator::StateLocator;
pub use logging::{default_log_level, init_console_logging, init_logging, logging_status, LogTarget};
pub use model::message::{GlobalId, Location, Message, Variant, VariantKind};
pub use proxy::definition::{DefinitionRegistry, ProxyDefinition, ProxyFactory};
pub use proxy::{Proxy, ProxyHandle};
pub use repo::snapshot_repo::{
    RepoError, RepoResult, SnapshotId, SnapshotRepository, SnapshotSummary,
    SqliteSnapshotRepository,
};
pub use service::snapshot_service::{RestoreReport, SnapshotService};
pub use session::config::SessionConfig;
pub use session::loopback::LoopbackTransport;
pub use session::transport::{SharedTransport, Transport};
pub use session::Session;
pub use undo::element::{UndoElement, UndoOutcome};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
