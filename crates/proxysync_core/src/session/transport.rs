//! Transport and backing-object collaborator contracts.
//!
//! # Responsibility
//! - Define the blocking boundary between a session and its servers.
//! - Define the server-side object contract used by property push/pull.
//!
//! # See also
//! - `session::loopback` for the in-process implementation.

use crate::error::SyncResult;
use crate::model::message::{GlobalId, Location, Message, Variant};
use std::cell::RefCell;
use std::rc::Rc;

/// Blocking message channel between one client session and its servers.
pub trait Transport {
    /// Id of the local client in collaboration rosters.
    fn client_id(&self) -> u32;

    /// Reserves `count` contiguous ids and returns the first one.
    fn reserve_global_ids(&mut self, count: u32) -> SyncResult<GlobalId>;

    /// Delivers a partial or full state update, routed by `msg.location`.
    fn push_state(&mut self, msg: &Message) -> SyncResult<()>;

    /// Requests server-side state for `request.global_id`.
    ///
    /// A request without property entries asks for the full state. Returns
    /// `None` when the server does not know the object.
    fn pull_state(&mut self, request: &Message) -> SyncResult<Option<Message>>;

    /// Destroys the server-side object.
    fn delete_object(&mut self, global_id: GlobalId, location: Location) -> SyncResult<()>;
}

pub type SharedTransport = Rc<RefCell<dyn Transport>>;

/// Server-side object a property command is applied to.
pub trait BackingObject {
    fn invoke(&mut self, command: &str, value: &Variant) -> SyncResult<()>;
    fn query(&self, command: &str) -> Option<Variant>;
}

/// Creates backing objects for a proxy type.
pub trait BackingFactory {
    fn create(&self, xml_group: &str, xml_name: &str) -> Option<Box<dyn BackingObject>>;
}
