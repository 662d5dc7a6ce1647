//! Snapshot repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist full object states captured from a session under one label.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - A snapshot and all of its states are written in one transaction.
//! - Stored states are full states (`global_id > 0`); share-only messages are
//!   rejected before any SQL runs.
//! - Read paths reject rows whose JSON no longer decodes instead of skipping
//!   them.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::message::Message;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type SnapshotId = Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(SnapshotId),
    InvalidData(String),
    Serialization(serde_json::Error),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "snapshot not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid snapshot data: {message}"),
            Self::Serialization(err) => write!(f, "snapshot state encoding failed: {err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) | Self::UninitializedConnection { .. } => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Listing row for one stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub label: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub state_count: usize,
}

/// Repository interface for session snapshots.
pub trait SnapshotRepository {
    fn save_snapshot(&self, label: &str, states: &[Message]) -> RepoResult<SnapshotId>;
    fn load_snapshot(&self, id: SnapshotId) -> RepoResult<Vec<Message>>;
    fn list_snapshots(&self) -> RepoResult<Vec<SnapshotSummary>>;
    fn delete_snapshot(&self, id: SnapshotId) -> RepoResult<()>;
}

/// SQLite-backed snapshot repository.
pub struct SqliteSnapshotRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSnapshotRepository<'conn> {
    /// Wraps a connection opened through `db::open_db*`.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let expected_version = latest_version();
        let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if actual_version != expected_version {
            return Err(RepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self { conn })
    }
}

impl SnapshotRepository for SqliteSnapshotRepository<'_> {
    fn save_snapshot(&self, label: &str, states: &[Message]) -> RepoResult<SnapshotId> {
        for state in states {
            validate_state(state)?;
        }

        let id = Uuid::new_v4();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO snapshots (snapshot_uuid, label, state_count) VALUES (?1, ?2, ?3);",
            params![id.to_string(), label, states.len() as i64],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO snapshot_states (
                    snapshot_uuid,
                    global_id,
                    xml_group,
                    xml_name,
                    state_json
                ) VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for state in states {
                let json = serde_json::to_string(state)?;
                insert.execute(params![
                    id.to_string(),
                    state.global_id as i64,
                    state.extensions.xml_group.as_deref(),
                    state.extensions.xml_name.as_deref(),
                    json,
                ])?;
            }
        }
        tx.commit()?;
        Ok(id)
    }

    fn load_snapshot(&self, id: SnapshotId) -> RepoResult<Vec<Message>> {
        ensure_snapshot_exists(self.conn, id)?;

        let mut stmt = self.conn.prepare(
            "SELECT global_id, state_json
             FROM snapshot_states
             WHERE snapshot_uuid = ?1
             ORDER BY global_id ASC;",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;
        let mut states = Vec::new();
        while let Some(row) = rows.next()? {
            states.push(parse_state_row(row)?);
        }
        Ok(states)
    }

    fn list_snapshots(&self) -> RepoResult<Vec<SnapshotSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_uuid, label, created_at, state_count
             FROM snapshots
             ORDER BY created_at DESC, snapshot_uuid ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            summaries.push(parse_summary_row(row)?);
        }
        Ok(summaries)
    }

    fn delete_snapshot(&self, id: SnapshotId) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM snapshot_states WHERE snapshot_uuid = ?1;",
            params![id.to_string()],
        )?;
        let deleted = tx.execute(
            "DELETE FROM snapshots WHERE snapshot_uuid = ?1;",
            params![id.to_string()],
        )?;
        if deleted == 0 {
            return Err(RepoError::NotFound(id));
        }
        tx.commit()?;
        Ok(())
    }
}

fn validate_state(state: &Message) -> RepoResult<()> {
    if state.global_id == 0 {
        return Err(RepoError::InvalidData(
            "state without a global id".to_string(),
        ));
    }
    if state.extensions.share_only {
        return Err(RepoError::InvalidData(format!(
            "share-only message for object {}",
            state.global_id
        )));
    }
    Ok(())
}

fn ensure_snapshot_exists(conn: &Connection, id: SnapshotId) -> RepoResult<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM snapshots WHERE snapshot_uuid = ?1;",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(RepoError::NotFound(id)),
    }
}

fn parse_state_row(row: &Row<'_>) -> RepoResult<Message> {
    let global_id: i64 = row.get(0)?;
    let json: String = row.get(1)?;
    let state: Message = serde_json::from_str(&json)?;
    if state.global_id as i64 != global_id {
        return Err(RepoError::InvalidData(format!(
            "row for object {global_id} holds state of object {}",
            state.global_id
        )));
    }
    Ok(state)
}

fn parse_summary_row(row: &Row<'_>) -> RepoResult<SnapshotSummary> {
    let raw_id: String = row.get(0)?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|err| RepoError::InvalidData(format!("invalid snapshot uuid `{raw_id}`: {err}")))?;
    let state_count: i64 = row.get(3)?;
    let state_count = usize::try_from(state_count)
        .map_err(|_| RepoError::InvalidData(format!("negative state count for {id}")))?;
    Ok(SnapshotSummary {
        id,
        label: row.get(1)?,
        created_at: row.get(2)?,
        state_count,
    })
}
