//! SQLite file format of the snapshot store.
//!
//! # Responsibility
//! - Open snapshot databases and bring their schema up to date.
//! - Refuse files this build cannot safely write to.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - A connection is handed out only after migrations ran and the snapshot
//!   tables were found.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    /// The database could not be opened or created at `target`.
    Open {
        target: String,
        source: rusqlite::Error,
    },
    /// Migration `version` failed; the whole upgrade was rolled back.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    /// The file was written by a build with a newer schema.
    SchemaTooNew { found: u32, supported: u32 },
    /// The file claims a current schema but lacks a snapshot table.
    ForeignSchema { missing_table: &'static str },
    Sqlite(rusqlite::Error),
}

impl DbError {
    /// Whether retrying with a newer build could succeed.
    pub fn needs_newer_build(&self) -> bool {
        matches!(self, Self::SchemaTooNew { .. })
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { target, source } => {
                write!(f, "cannot open snapshot store `{target}`: {source}")
            }
            Self::Migration { version, source } => {
                write!(f, "snapshot schema migration {version} failed: {source}")
            }
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "snapshot schema version {found} is newer than supported {supported}"
            ),
            Self::ForeignSchema { missing_table } => {
                write!(f, "not a snapshot store: table `{missing_table}` is missing")
            }
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Migration { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } | Self::ForeignSchema { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
