//! Id-to-object resolution and historical state.
//!
//! # Responsibility
//! - `ProxyLocator` + `Deserializer`: rebuild live proxy graphs from ids.
//! - `StateLocator`: remember full states, including those of unregistered
//!   objects while undo may still need them.

pub mod deserializer;
pub mod proxy_locator;
pub mod state_locator;
