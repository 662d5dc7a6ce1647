//! Core error contracts.
//!
//! # Responsibility
//! - Provide one error enum shared by proxy, session, locator, and undo code.
//! - Keep protocol corruption recoverable instead of aborting the process.
//!
//! # Invariants
//! - `CorruptState` is reserved for messages that do not match the proxy they
//!   are applied to (name or kind mismatch).
//! - Lenient paths (missing backing object, unresolved references) never
//!   produce an error; they are reported through session diagnostics.

use crate::model::message::{GlobalId, VariantKind};
use crate::proxy::definition::DefinitionError;
use crate::repo::snapshot_repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by synchronization, location, and undo operations.
#[derive(Debug)]
pub enum SyncError {
    /// Incoming message does not match the property it is applied to.
    CorruptState { property: String, detail: String },
    /// Property name is not declared on the proxy.
    UnknownProperty(String),
    /// Typed accessor used against a property of another kind.
    KindMismatch {
        property: String,
        expected: VariantKind,
        found: VariantKind,
    },
    /// Element index outside the current value vector.
    IndexOutOfRange {
        property: String,
        index: usize,
        len: usize,
    },
    /// Object has no assigned global id or is not registered in the session.
    NotRegistered(GlobalId),
    /// Another proxy instance already holds this id in the session registry.
    AlreadyRegistered(GlobalId),
    /// Attempt to assign a second global id to an object.
    IdentityConflict {
        current: GlobalId,
        requested: GlobalId,
    },
    /// Factory has no definition for the requested proxy type.
    UnknownProxyType { group: String, name: String },
    /// Transport collaborator failure.
    Transport(String),
    /// Definition registry failure.
    Definition(DefinitionError),
    /// JSON encode/decode failure.
    Serialization(serde_json::Error),
    /// Snapshot store failure.
    Persistence(RepoError),
}

impl SyncError {
    pub(crate) fn corrupt(property: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::CorruptState {
            property: property.into(),
            detail: detail.into(),
        }
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptState { property, detail } => {
                write!(f, "corrupted state for property `{property}`: {detail}")
            }
            Self::UnknownProperty(name) => write!(f, "unknown property: {name}"),
            Self::KindMismatch {
                property,
                expected,
                found,
            } => write!(
                f,
                "property `{property}` holds {found} values, not {expected}"
            ),
            Self::IndexOutOfRange {
                property,
                index,
                len,
            } => write!(
                f,
                "index {index} out of range for property `{property}` with {len} elements"
            ),
            Self::NotRegistered(id) => write!(f, "remote object not registered: {id}"),
            Self::AlreadyRegistered(id) => {
                write!(f, "global id {id} is registered to another proxy")
            }
            Self::IdentityConflict { current, requested } => write!(
                f,
                "global id already assigned as {current}; refusing to reassign to {requested}"
            ),
            Self::UnknownProxyType { group, name } => {
                write!(f, "no proxy definition for {group}/{name}")
            }
            Self::Transport(message) => write!(f, "transport failure: {message}"),
            Self::Definition(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "{err}"),
            Self::Persistence(err) => write!(f, "snapshot store: {err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Definition(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DefinitionError> for SyncError {
    fn from(value: DefinitionError) -> Self {
        Self::Definition(value)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Persistence(value)
    }
}
