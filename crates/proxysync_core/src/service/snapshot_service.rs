//! Session snapshot use cases.
//!
//! # Responsibility
//! - Capture the full states of all registered objects into a repository.
//! - Rebuild a stored object graph into a live session.
//!
//! # Invariants
//! - Restore never replaces an object that is already registered.
//! - Sub-proxies are restored through their parent, never on their own.

use crate::error::SyncResult;
use crate::locator::deserializer::Deserializer;
use crate::model::message::{GlobalId, Message};
use crate::repo::snapshot_repo::{RepoResult, SnapshotId, SnapshotRepository, SnapshotSummary};
use crate::session::Session;
use log::{info, warn};
use std::rc::Rc;

/// Result of restoring one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Top-level objects created from the snapshot.
    pub restored: Vec<GlobalId>,
    /// Objects skipped because the id is already registered.
    pub already_present: Vec<GlobalId>,
    /// Objects the factory could not rebuild.
    pub missing: Vec<GlobalId>,
}

pub struct SnapshotService<R: SnapshotRepository> {
    repo: R,
}

impl<R: SnapshotRepository> SnapshotService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Stores the current state of every registered object.
    ///
    /// States already held by the state locator are used as-is; objects that
    /// were never pushed contribute their local full state.
    pub fn save_session(&self, session: &Session, label: &str) -> SyncResult<SnapshotId> {
        let states = collect_states(session)?;
        let id = self.repo.save_snapshot(label, &states)?;
        info!(
            "event=snapshot_save module=service status=ok snapshot={id} states={}",
            states.len()
        );
        Ok(id)
    }

    pub fn load_states(&self, id: SnapshotId) -> RepoResult<Vec<Message>> {
        self.repo.load_snapshot(id)
    }

    pub fn list_snapshots(&self) -> RepoResult<Vec<SnapshotSummary>> {
        self.repo.list_snapshots()
    }

    pub fn delete_snapshot(&self, id: SnapshotId) -> RepoResult<()> {
        self.repo.delete_snapshot(id)
    }

    /// Recreates the objects of snapshot `id` in `session`.
    pub fn restore_session(&self, id: SnapshotId, session: &mut Session) -> SyncResult<RestoreReport> {
        let states = self.repo.load_snapshot(id)?;
        let roots: Vec<GlobalId> = states
            .iter()
            .filter(|state| state.extensions.xml_sub_proxy_name.is_none())
            .map(|state| state.global_id)
            .collect();

        let deserializer = Rc::new(Deserializer::from_elements(states).with_state_locator(false));
        let mut locator = session.new_locator(Some(deserializer));
        let mut report = RestoreReport::default();
        for global_id in roots {
            if session.proxy(global_id).is_some() {
                report.already_present.push(global_id);
                continue;
            }
            match locator.locate_proxy(global_id, session) {
                Some(_) => report.restored.push(global_id),
                None => {
                    warn!("event=snapshot_restore module=service status=skip snapshot={id} global_id={global_id}");
                    report.missing.push(global_id);
                }
            }
        }
        info!(
            "event=snapshot_restore module=service status=ok snapshot={id} restored={} missing={}",
            report.restored.len(),
            report.missing.len()
        );
        Ok(report)
    }
}

fn collect_states(session: &Session) -> SyncResult<Vec<Message>> {
    let mut states = Vec::new();
    for global_id in session.registered_ids() {
        if let Some(state) = session.state_locator().local_state(global_id) {
            states.push(state.clone());
            continue;
        }
        if let Some(proxy) = session.proxy(global_id) {
            states.push(proxy.borrow().full_state()?);
        }
    }
    Ok(states)
}
