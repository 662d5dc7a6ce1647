//! Undoable units recorded from the push path.

use crate::error::SyncResult;
use crate::locator::deserializer::Deserializer;
use crate::locator::proxy_locator::LocatorResolver;
use crate::model::message::{GlobalId, Message};
use crate::session::Session;
use std::rc::Rc;

/// Result of applying one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    Applied,
    /// The target object is gone; the element was skipped.
    TargetNotFound(GlobalId),
}

/// One recorded change.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoElement {
    /// Full state before and after one push.
    StateChange {
        global_id: GlobalId,
        previous: Message,
        next: Message,
    },
    /// Object creation; `state` is its first full state.
    Create { global_id: GlobalId, state: Message },
    /// Object unregistration; `state` is its last full state.
    Delete { global_id: GlobalId, state: Message },
}

impl UndoElement {
    pub fn global_id(&self) -> GlobalId {
        match self {
            Self::StateChange { global_id, .. }
            | Self::Create { global_id, .. }
            | Self::Delete { global_id, .. } => *global_id,
        }
    }

    pub fn undo(&self, session: &mut Session) -> SyncResult<UndoOutcome> {
        match self {
            Self::StateChange {
                global_id,
                previous,
                ..
            } => load_onto_registered(*global_id, previous, session),
            Self::Create { global_id, .. } => remove(*global_id, session),
            Self::Delete { global_id, state } => recreate(*global_id, state, session),
        }
    }

    pub fn redo(&self, session: &mut Session) -> SyncResult<UndoOutcome> {
        match self {
            Self::StateChange {
                global_id, next, ..
            } => load_onto_registered(*global_id, next, session),
            Self::Create { global_id, state } => recreate(*global_id, state, session),
            Self::Delete { global_id, .. } => remove(*global_id, session),
        }
    }
}

fn load_onto_registered(
    global_id: GlobalId,
    state: &Message,
    session: &mut Session,
) -> SyncResult<UndoOutcome> {
    let Some(proxy) = session.proxy(global_id) else {
        return Ok(UndoOutcome::TargetNotFound(global_id));
    };

    let mut locator = session.new_locator(None);
    let report = proxy
        .borrow_mut()
        .load_state(state, &mut LocatorResolver::new(&mut locator, session))?;
    session.record_load_report(global_id, &report);
    proxy.borrow_mut().update_vtk_objects(session)?;
    Ok(UndoOutcome::Applied)
}

fn remove(global_id: GlobalId, session: &mut Session) -> SyncResult<UndoOutcome> {
    if session.unregister_proxy(global_id)? {
        Ok(UndoOutcome::Applied)
    } else {
        Ok(UndoOutcome::TargetNotFound(global_id))
    }
}

fn recreate(global_id: GlobalId, state: &Message, session: &mut Session) -> SyncResult<UndoOutcome> {
    if session.proxy(global_id).is_some() {
        return Ok(UndoOutcome::Applied);
    }

    let deserializer = Rc::new(Deserializer::from_elements([state.clone()]));
    let mut locator = session.new_locator(Some(deserializer));
    match locator.locate_proxy(global_id, session) {
        Some(_) => Ok(UndoOutcome::Applied),
        None => Ok(UndoOutcome::TargetNotFound(global_id)),
    }
}

/// Atomic group of elements pushed by one outermost `end()`.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoSet {
    label: String,
    elements: Vec<UndoElement>,
}

impl UndoSet {
    pub fn new(label: impl Into<String>, elements: Vec<UndoElement>) -> Self {
        Self {
            label: label.into(),
            elements,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn elements(&self) -> &[UndoElement] {
        &self.elements
    }

    /// Reverts elements in reverse recording order.
    pub fn undo(&self, session: &mut Session) -> SyncResult<Vec<UndoOutcome>> {
        self.elements
            .iter()
            .rev()
            .map(|element| element.undo(session))
            .collect()
    }

    /// Re-applies elements in recording order.
    pub fn redo(&self, session: &mut Session) -> SyncResult<Vec<UndoOutcome>> {
        self.elements
            .iter()
            .map(|element| element.redo(session))
            .collect()
    }
}
