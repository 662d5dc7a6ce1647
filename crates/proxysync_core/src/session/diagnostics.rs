//! Observable channel for lenient, non-fatal outcomes.

use crate::model::message::GlobalId;
use log::warn;

/// One recorded non-fatal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A proxy reference could not be resolved and was dropped on load.
    DroppedReference {
        owner: GlobalId,
        property: String,
        reference: GlobalId,
    },
    /// An undo/redo element targeted an object that no longer exists.
    UndoTargetMissing { global_id: GlobalId },
    /// A remote notification could not be applied.
    NotificationDropped { global_id: GlobalId, reason: String },
    /// Stored state could not be applied to a freshly created proxy.
    DeserializationFailed { global_id: GlobalId, reason: String },
}

/// Append-only diagnostic log owned by the session.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn record(&mut self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::DroppedReference {
                owner,
                property,
                reference,
            } => warn!(
                "event=reference_drop module=session status=warn global_id={owner} property={property} reference={reference}"
            ),
            Diagnostic::UndoTargetMissing { global_id } => {
                warn!("event=undo_apply module=session status=warn global_id={global_id} reason=target_missing")
            }
            Diagnostic::NotificationDropped { global_id, reason } => warn!(
                "event=notification_apply module=session status=warn global_id={global_id} reason={reason}"
            ),
            Diagnostic::DeserializationFailed { global_id, reason } => warn!(
                "event=state_load module=locator status=warn global_id={global_id} reason={reason}"
            ),
        }
        self.entries.push(diagnostic);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
