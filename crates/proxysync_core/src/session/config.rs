//! Session configuration.

use crate::error::SyncResult;
use serde::{Deserialize, Serialize};

/// Tunables of one client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Record undo sets from the push path.
    pub undo_enabled: bool,
    /// Maximum number of undo sets; also the TTL of unregistered states.
    pub undo_depth: usize,
    /// Number of ids reserved from the transport per request.
    pub id_chunk_size: u32,
    /// Let locators resolve ids against already-registered proxies.
    pub locator_uses_session_registry: bool,
    /// `xml_name`s treated as cameras by the collaboration manager.
    pub camera_proxy_names: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            undo_enabled: true,
            undo_depth: 64,
            id_chunk_size: 256,
            locator_uses_session_registry: true,
            camera_proxy_names: vec!["RenderView".to_string()],
        }
    }
}

impl SessionConfig {
    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
