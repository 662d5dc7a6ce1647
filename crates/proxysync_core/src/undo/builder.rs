//! Collects undo elements between `begin` and `end`.
//!
//! # Invariants
//! - Brackets nest; only the outermost `end` pushes a set.
//! - The first label of a bracket wins.
//! - Changes outside a bracket are not recorded.

use crate::model::message::{GlobalId, Message};
use crate::undo::element::{UndoElement, UndoSet};
use crate::undo::stack::UndoStack;
use log::debug;

#[derive(Debug, Clone, Default)]
pub struct UndoStackBuilder {
    depth: usize,
    label: Option<String>,
    pending: Vec<UndoElement>,
    ignore_all_changes: bool,
}

impl UndoStackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, label: &str) {
        if self.label.is_none() {
            self.label = Some(label.to_string());
        }
        self.depth += 1;
    }

    /// Closes one bracket level; returns whether a set was pushed.
    pub fn end(&mut self, stack: &mut UndoStack) -> bool {
        if self.depth == 0 {
            return false;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return false;
        }

        let label = self.label.take().unwrap_or_default();
        let elements = std::mem::take(&mut self.pending);
        if elements.is_empty() {
            return false;
        }
        debug!(
            "event=undo_push module=undo status=ok label={label:?} elements={}",
            elements.len()
        );
        stack.push(UndoSet::new(label, elements));
        true
    }

    pub fn is_recording(&self) -> bool {
        self.depth > 0 && !self.ignore_all_changes
    }

    pub fn set_ignore_all_changes(&mut self, ignore: bool) {
        self.ignore_all_changes = ignore;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops any open bracket and its pending elements.
    pub fn clear(&mut self) {
        self.depth = 0;
        self.label = None;
        self.pending.clear();
    }

    pub fn on_state_change(&mut self, global_id: GlobalId, previous: Message, next: Message) {
        self.record(UndoElement::StateChange {
            global_id,
            previous,
            next,
        });
    }

    pub fn on_create_object(&mut self, state: Message) {
        self.record(UndoElement::Create {
            global_id: state.global_id,
            state,
        });
    }

    pub fn on_delete_object(&mut self, state: Message) {
        self.record(UndoElement::Delete {
            global_id: state.global_id,
            state,
        });
    }

    fn record(&mut self, element: UndoElement) {
        if self.is_recording() {
            self.pending.push(element);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UndoStackBuilder;
    use crate::model::message::{Location, Message};
    use crate::undo::stack::UndoStack;

    fn state(id: u32) -> Message {
        Message::new(id, Location::DATA_SERVER)
    }

    #[test]
    fn nested_brackets_push_one_set_with_first_label() {
        let mut builder = UndoStackBuilder::new();
        let mut stack = UndoStack::new(8);

        builder.begin("outer");
        builder.on_create_object(state(11));
        builder.begin("inner");
        builder.on_state_change(11, state(11), state(11));
        assert!(!builder.end(&mut stack));
        assert!(!stack.can_undo());
        assert!(builder.end(&mut stack));

        assert_eq!(stack.undo_len(), 1);
        assert_eq!(stack.undo_label(), Some("outer"));
        let set = stack.pop_undo().unwrap();
        assert_eq!(set.elements().len(), 2);
    }

    #[test]
    fn changes_outside_brackets_and_empty_sets_are_dropped() {
        let mut builder = UndoStackBuilder::new();
        let mut stack = UndoStack::new(8);
        builder.on_create_object(state(11));
        builder.begin("nothing");
        assert!(!builder.end(&mut stack));
        assert!(!builder.end(&mut stack));
        assert!(!stack.can_undo());
    }

    #[test]
    fn ignore_all_changes_suspends_recording() {
        let mut builder = UndoStackBuilder::new();
        builder.begin("x");
        builder.set_ignore_all_changes(true);
        builder.on_create_object(state(11));
        builder.set_ignore_all_changes(false);
        builder.on_create_object(state(12));
        assert_eq!(builder.pending_len(), 1);
    }
}
