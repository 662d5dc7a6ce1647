//! Multi-client roster, master role, and camera following.
//!
//! # Responsibility
//! - Mirror the roster broadcast by the master and report field-level changes.
//! - Gate master-only broadcasts.
//! - Route camera updates from the followed user, coalescing them while a
//!   remote notification batch is being processed.
//!
//! # Invariants
//! - A roster diff fires exactly one event per changed field and none for
//!   unchanged fields.
//! - The pending camera slot holds at most one message (latest wins).
//! - A client that has not received any roster acts as its own master.

use crate::model::message::{Location, Message, COLLABORATION_MANAGER_ID};
use crate::model::roster::{Roster, RosterUser};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

/// Observable roster change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaborationEvent {
    UserListChanged,
    UserNameChanged(u32),
    MasterChanged(u32),
    FollowUser(u32),
    ConnectIdChanged(i32),
    DisableConnectionsChanged(bool),
}

/// How `load_state` handled a message.
#[derive(Debug, Clone, PartialEq)]
pub enum CollaborationOutcome {
    /// Roster applied; see `take_events`.
    Roster,
    /// Camera update from the followed user, to be applied now.
    ApplyCamera(Message),
    /// Camera update parked until the notification batch completes.
    Deferred,
    /// Camera-like message not from the followed user.
    Ignored,
    /// Not a collaboration message.
    NotHandled,
}

#[derive(Debug, Clone)]
pub struct CollaborationManager {
    local_user: u32,
    users: Vec<u32>,
    names: BTreeMap<u32, String>,
    master: u32,
    followed: u32,
    connect_id: i32,
    disable_further_connections: bool,
    camera_proxy_names: BTreeSet<String>,
    cameras: BTreeMap<u32, Message>,
    pending_camera: Option<Message>,
    events: Vec<CollaborationEvent>,
}

impl CollaborationManager {
    pub fn new(local_user: u32, camera_proxy_names: &[String]) -> Self {
        Self {
            local_user,
            users: Vec::new(),
            names: BTreeMap::new(),
            master: 0,
            followed: 0,
            connect_id: 0,
            disable_further_connections: false,
            camera_proxy_names: camera_proxy_names.iter().cloned().collect(),
            cameras: BTreeMap::new(),
            pending_camera: None,
            events: Vec::new(),
        }
    }

    pub fn local_user(&self) -> u32 {
        self.local_user
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn user_ids(&self) -> &[u32] {
        &self.users
    }

    pub fn user_name(&self, user_id: u32) -> Option<&str> {
        self.names.get(&user_id).map(String::as_str)
    }

    pub fn master(&self) -> u32 {
        self.master
    }

    pub fn is_master(&self) -> bool {
        self.users.is_empty() || self.master == self.local_user
    }

    pub fn followed_user(&self) -> u32 {
        self.followed
    }

    pub fn connect_id(&self) -> i32 {
        self.connect_id
    }

    pub fn further_connections_disabled(&self) -> bool {
        self.disable_further_connections
    }

    /// Last camera state shared by `user_id`.
    pub fn camera_for(&self, user_id: u32) -> Option<&Message> {
        self.cameras.get(&user_id)
    }

    pub fn take_events(&mut self) -> Vec<CollaborationEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn take_pending_camera(&mut self) -> Option<Message> {
        self.pending_camera.take()
    }

    pub fn has_pending_camera(&self) -> bool {
        self.pending_camera.is_some()
    }

    /// Dispatches one incoming message.
    ///
    /// `in_flight` is set while a remote notification batch is processed.
    pub fn load_state(&mut self, msg: &Message, in_flight: bool) -> CollaborationOutcome {
        if let Some(roster) = &msg.extensions.roster {
            self.apply_roster(roster);
            return CollaborationOutcome::Roster;
        }

        let is_camera = msg.extensions.share_only
            && msg
                .extensions
                .xml_name
                .as_deref()
                .is_some_and(|name| self.camera_proxy_names.contains(name));
        if !is_camera {
            return CollaborationOutcome::NotHandled;
        }

        let Some(sender) = msg.extensions.client_id else {
            debug!(
                "event=camera_update module=collaboration status=drop global_id={} reason=no_sender",
                msg.global_id
            );
            return CollaborationOutcome::Ignored;
        };
        self.cameras.insert(sender, msg.clone());

        if sender == self.local_user || sender != self.followed || self.followed == 0 {
            return CollaborationOutcome::Ignored;
        }
        if in_flight {
            self.pending_camera = Some(msg.clone());
            CollaborationOutcome::Deferred
        } else {
            CollaborationOutcome::ApplyCamera(msg.clone())
        }
    }

    /// Hands the local master role to `user_id`; master only.
    ///
    /// Once a roster is known, `user_id` must be listed in it.
    pub fn promote_to_master(&mut self, user_id: u32) -> Option<Message> {
        if !self.is_master() {
            return None;
        }
        if !self.users.is_empty() && !self.users.contains(&user_id) {
            debug!(
                "event=master_promote module=collaboration status=reject user_id={user_id} reason=unknown_user"
            );
            return None;
        }
        self.set_master(user_id);
        Some(self.roster_message())
    }

    /// Toggles acceptance of new clients; master only.
    pub fn disable_further_connections(&mut self, disable: bool) -> Option<Message> {
        if !self.is_master() {
            return None;
        }
        if self.disable_further_connections != disable {
            self.disable_further_connections = disable;
            self.events
                .push(CollaborationEvent::DisableConnectionsChanged(disable));
        }
        Some(self.roster_message())
    }

    /// Publishes a new connect id; master only.
    pub fn set_connect_id(&mut self, connect_id: i32) -> Option<Message> {
        if !self.is_master() {
            return None;
        }
        if self.connect_id != connect_id {
            self.connect_id = connect_id;
            self.events
                .push(CollaborationEvent::ConnectIdChanged(connect_id));
        }
        Some(self.roster_message())
    }

    /// Follows `user_id`'s camera; broadcast for everybody when master.
    pub fn follow_user(&mut self, user_id: u32) -> Option<Message> {
        if self.followed != user_id {
            self.followed = user_id;
            self.events.push(CollaborationEvent::FollowUser(user_id));
        }
        self.is_master().then(|| self.roster_message())
    }

    /// Renames a user; always broadcast.
    pub fn set_user_label(&mut self, user_id: u32, name: &str) -> Message {
        if self.names.get(&user_id).map(String::as_str) != Some(name) {
            self.names.insert(user_id, name.to_string());
            self.events.push(CollaborationEvent::UserNameChanged(user_id));
        }
        if !self.users.contains(&user_id) {
            self.users.push(user_id);
            self.events.push(CollaborationEvent::UserListChanged);
        }
        self.roster_message()
    }

    /// Wraps a camera state for sharing with other clients.
    pub fn share_camera(&self, state: &Message) -> Message {
        let mut shared = state.clone();
        shared.extensions.share_only = true;
        shared.extensions.client_id = Some(self.local_user);
        shared
    }

    /// Current roster as the master would broadcast it.
    pub fn roster_message(&self) -> Message {
        let users = self
            .users
            .iter()
            .map(|user_id| RosterUser {
                user_id: *user_id,
                display_name: self.names.get(user_id).cloned().unwrap_or_default(),
                is_master: *user_id == self.master,
                follow_cam: *user_id == self.followed,
                disable_further_connections: self.disable_further_connections,
                connect_id: self.connect_id,
            })
            .collect();

        let mut msg = Message::new(COLLABORATION_MANAGER_ID, Location::DATA_SERVER_ROOT);
        msg.extensions.share_only = true;
        msg.extensions.client_id = Some(self.local_user);
        msg.extensions.roster = Some(Roster { users });
        msg
    }

    fn set_master(&mut self, user_id: u32) {
        if self.master != user_id {
            self.master = user_id;
            self.events.push(CollaborationEvent::MasterChanged(user_id));
            info!("event=master_change module=collaboration status=ok master={user_id}");
        }
    }

    fn apply_roster(&mut self, roster: &Roster) {
        let user_ids = roster.user_ids();
        if user_ids != self.users {
            self.users = user_ids;
            self.events.push(CollaborationEvent::UserListChanged);
        }

        let live: BTreeSet<u32> = self.users.iter().copied().collect();
        self.names.retain(|user_id, _| live.contains(user_id));
        self.cameras.retain(|user_id, _| live.contains(user_id));
        for user in &roster.users {
            if self.names.get(&user.user_id) != Some(&user.display_name) {
                self.names
                    .insert(user.user_id, user.display_name.clone());
                self.events
                    .push(CollaborationEvent::UserNameChanged(user.user_id));
            }
        }

        let master = roster.master();
        self.set_master(master.map(|user| user.user_id).unwrap_or(0));

        let followed = roster.followed().map(|user| user.user_id).unwrap_or(0);
        if followed != self.followed {
            self.followed = followed;
            self.events.push(CollaborationEvent::FollowUser(followed));
        }

        let connect_id = master.map(|user| user.connect_id).unwrap_or(0);
        if connect_id != self.connect_id {
            self.connect_id = connect_id;
            self.events
                .push(CollaborationEvent::ConnectIdChanged(connect_id));
        }

        let disabled = master.is_some_and(|user| user.disable_further_connections);
        if disabled != self.disable_further_connections {
            self.disable_further_connections = disabled;
            self.events
                .push(CollaborationEvent::DisableConnectionsChanged(disabled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CollaborationEvent, CollaborationManager, CollaborationOutcome};
    use crate::model::message::{Location, Message};
    use crate::model::roster::{Roster, RosterUser};

    fn roster_message(users: Vec<RosterUser>) -> Message {
        let mut msg = Message::new(2, Location::DATA_SERVER_ROOT);
        msg.extensions.roster = Some(Roster { users });
        msg
    }

    fn user(id: u32, name: &str, master: bool) -> RosterUser {
        RosterUser {
            is_master: master,
            ..RosterUser::new(id, name)
        }
    }

    fn camera(sender: u32) -> Message {
        let mut msg = Message::new(30, Location::RENDER_SERVER);
        msg.extensions.xml_name = Some("RenderView".to_string());
        msg.extensions.client_id = Some(sender);
        msg.extensions.share_only = true;
        msg
    }

    fn manager() -> CollaborationManager {
        CollaborationManager::new(1, &["RenderView".to_string()])
    }

    #[test]
    fn master_handover_fires_exactly_one_event() {
        let mut manager = manager();
        manager.load_state(
            &roster_message(vec![user(1, "A", true), user(2, "B", false)]),
            false,
        );
        let initial = manager.take_events();
        assert!(initial.contains(&CollaborationEvent::MasterChanged(1)));
        assert!(initial.contains(&CollaborationEvent::UserListChanged));

        manager.load_state(
            &roster_message(vec![user(1, "A", false), user(2, "B", true)]),
            false,
        );
        assert_eq!(
            manager.take_events(),
            vec![CollaborationEvent::MasterChanged(2)]
        );
        assert!(!manager.is_master());
    }

    #[test]
    fn identical_roster_fires_nothing() {
        let mut manager = manager();
        let msg = roster_message(vec![user(1, "A", true)]);
        manager.load_state(&msg, false);
        manager.take_events();
        manager.load_state(&msg, false);
        assert!(manager.take_events().is_empty());
    }

    #[test]
    fn master_only_operations_are_gated() {
        let mut manager = manager();
        manager.load_state(
            &roster_message(vec![user(1, "A", false), user(2, "B", true)]),
            false,
        );
        manager.take_events();

        assert!(manager.promote_to_master(1).is_none());
        assert!(manager.disable_further_connections(true).is_none());
        assert!(manager.set_connect_id(7).is_none());
        assert!(manager.take_events().is_empty());

        assert!(manager.follow_user(2).is_none());
        assert_eq!(manager.followed_user(), 2);
        assert_eq!(manager.take_events(), vec![CollaborationEvent::FollowUser(2)]);
    }

    #[test]
    fn standalone_client_is_master_and_broadcasts() {
        let mut manager = manager();
        assert!(manager.is_master());
        let msg = manager.set_connect_id(5).unwrap();
        assert!(msg.extensions.share_only);
        assert!(msg.is_roster());
        assert_eq!(manager.connect_id(), 5);
    }

    #[test]
    fn camera_from_followed_user_is_deferred_while_in_flight() {
        let mut manager = manager();
        manager.load_state(
            &roster_message(vec![
                user(1, "A", true),
                RosterUser {
                    follow_cam: true,
                    ..user(2, "B", false)
                },
            ]),
            false,
        );
        assert_eq!(manager.followed_user(), 2);

        assert_eq!(manager.load_state(&camera(2), true), CollaborationOutcome::Deferred);
        assert_eq!(manager.load_state(&camera(2), true), CollaborationOutcome::Deferred);
        assert!(manager.take_pending_camera().is_some());
        assert!(manager.take_pending_camera().is_none());

        assert!(matches!(
            manager.load_state(&camera(2), false),
            CollaborationOutcome::ApplyCamera(_)
        ));
        assert_eq!(manager.load_state(&camera(3), false), CollaborationOutcome::Ignored);
        assert!(manager.camera_for(2).is_some());
    }

    #[test]
    fn regular_view_updates_bypass_camera_routing() {
        let mut manager = manager();
        let mut update = camera(2);
        update.extensions.share_only = false;
        assert_eq!(manager.load_state(&update, false), CollaborationOutcome::NotHandled);
        assert!(manager.camera_for(2).is_none());
    }

    #[test]
    fn promotion_requires_a_listed_user() {
        let mut manager = manager();
        manager.load_state(
            &roster_message(vec![user(1, "A", true), user(2, "B", false)]),
            false,
        );
        manager.take_events();

        assert!(manager.promote_to_master(9).is_none());
        assert_eq!(manager.master(), 1);
        assert!(manager.take_events().is_empty());
        assert!(manager.promote_to_master(2).is_some());
        assert_eq!(manager.master(), 2);
    }

    #[test]
    fn non_camera_messages_are_not_handled() {
        let mut manager = manager();
        let msg = Message::new(40, Location::DATA_SERVER);
        assert_eq!(manager.load_state(&msg, false), CollaborationOutcome::NotHandled);
    }
}
