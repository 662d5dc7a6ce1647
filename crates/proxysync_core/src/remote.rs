//! Remote object identity.
//!
//! # Responsibility
//! - Hold the identity shared by every object mirrored across processes.
//!
//! # Invariants
//! - A global id is assigned at most once and never mutated afterwards.
//! - Prototype objects are templates and never synchronized.

use crate::error::{SyncError, SyncResult};
use crate::model::message::{GlobalId, Location};
use once_cell::unsync::OnceCell;

/// Identity and routing data of one remote object.
#[derive(Debug, Default)]
pub struct RemoteObject {
    global_id: OnceCell<GlobalId>,
    location: Location,
    prototype: bool,
}

impl RemoteObject {
    pub fn new(location: Location) -> Self {
        Self {
            global_id: OnceCell::new(),
            location,
            prototype: false,
        }
    }

    /// Returns the assigned id, or `None` while the object is unregistered.
    pub fn global_id(&self) -> Option<GlobalId> {
        self.global_id.get().copied()
    }

    /// Assigns the global id once.
    ///
    /// Re-assigning the same id is a no-op; a different id is rejected.
    pub fn assign_global_id(&self, id: GlobalId) -> SyncResult<GlobalId> {
        if id == 0 {
            return Err(SyncError::NotRegistered(0));
        }
        let current = *self.global_id.get_or_init(|| id);
        if current != id {
            return Err(SyncError::IdentityConflict {
                current,
                requested: id,
            });
        }
        Ok(current)
    }

    /// Returns the id, failing when none has been assigned yet.
    pub fn require_global_id(&self) -> SyncResult<GlobalId> {
        self.global_id().ok_or(SyncError::NotRegistered(0))
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    pub fn is_prototype(&self) -> bool {
        self.prototype
    }

    pub fn set_prototype(&mut self, prototype: bool) {
        self.prototype = prototype;
    }
}

#[cfg(test)]
mod tests {
    use super::RemoteObject;
    use crate::error::SyncError;
    use crate::model::message::Location;

    #[test]
    fn global_id_is_assigned_once() {
        let object = RemoteObject::new(Location::DATA_SERVER);
        assert_eq!(object.global_id(), None);
        assert_eq!(object.assign_global_id(42).unwrap(), 42);
        assert_eq!(object.assign_global_id(42).unwrap(), 42);

        let err = object.assign_global_id(43).unwrap_err();
        assert!(matches!(
            err,
            SyncError::IdentityConflict {
                current: 42,
                requested: 43
            }
        ));
        assert_eq!(object.global_id(), Some(42));
    }

    #[test]
    fn zero_is_not_a_valid_identity() {
        let object = RemoteObject::default();
        assert!(object.assign_global_id(0).is_err());
        assert!(object.require_global_id().is_err());
    }
}
