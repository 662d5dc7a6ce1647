//! Undo/redo capture over synchronized state.
//!
//! # Responsibility
//! - Record per-object before/after states produced by the push path.
//! - Group them into labelled atomic sets and replay them.
//!
//! # See also
//! - `Session::undo` / `Session::redo` for the application guard.

pub mod builder;
pub mod element;
pub mod stack;
