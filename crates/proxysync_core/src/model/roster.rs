//! Collaboration roster extension.

use serde::{Deserialize, Serialize};

/// One connected client as broadcast by the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterUser {
    pub user_id: u32,
    pub display_name: String,
    #[serde(default)]
    pub is_master: bool,
    /// Set on the user whose camera everybody follows.
    #[serde(default)]
    pub follow_cam: bool,
    #[serde(default)]
    pub disable_further_connections: bool,
    #[serde(default)]
    pub connect_id: i32,
}

impl RosterUser {
    pub fn new(user_id: u32, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            is_master: false,
            follow_cam: false,
            disable_further_connections: false,
            connect_id: 0,
        }
    }
}

/// Ordered list of connected clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub users: Vec<RosterUser>,
}

impl Roster {
    pub fn user_ids(&self) -> Vec<u32> {
        self.users.iter().map(|user| user.user_id).collect()
    }

    pub fn find(&self, user_id: u32) -> Option<&RosterUser> {
        self.users.iter().find(|user| user.user_id == user_id)
    }

    pub fn master(&self) -> Option<&RosterUser> {
        self.users.iter().find(|user| user.is_master)
    }

    pub fn followed(&self) -> Option<&RosterUser> {
        self.users.iter().find(|user| user.follow_cam)
    }
}
