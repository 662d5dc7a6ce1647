//! Bounded undo/redo stacks.

use crate::undo::element::UndoSet;
use log::debug;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct UndoStack {
    undo: VecDeque<UndoSet>,
    redo: Vec<UndoSet>,
    max_depth: usize,
}

impl UndoStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Pushes a freshly recorded set; clears the redo stack.
    pub fn push(&mut self, set: UndoSet) {
        self.redo.clear();
        self.undo.push_back(set);
        while self.undo.len() > self.max_depth {
            if let Some(dropped) = self.undo.pop_front() {
                debug!(
                    "event=undo_push module=undo status=overflow label={:?}",
                    dropped.label()
                );
            }
        }
    }

    pub fn pop_undo(&mut self) -> Option<UndoSet> {
        self.undo.pop_back()
    }

    pub fn pop_redo(&mut self) -> Option<UndoSet> {
        self.redo.pop()
    }

    pub(crate) fn push_redo(&mut self, set: UndoSet) {
        self.redo.push(set);
    }

    /// Returns a redone set to the undo stack without touching redo.
    pub(crate) fn push_undone(&mut self, set: UndoSet) {
        self.undo.push_back(set);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.undo.back().map(UndoSet::label)
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.redo.last().map(UndoSet::label)
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
