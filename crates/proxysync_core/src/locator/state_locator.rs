//! Last-known full state per object, with undo-anchored garbage collection.
//!
//! # Responsibility
//! - Keep the most recent full `Message` per `GlobalId` (last-write-wins).
//! - Delegate misses to an optional parent, e.g. the server.
//! - Retain states of unregistered objects while undo may still need them.
//!
//! # Invariants
//! - GC only runs while an undo stack is attached.
//! - An unregistered state survives exactly `depth` undo-stack pops and is
//!   evicted on the next one; re-registration cancels the countdown.
//! - A countdown started while an undo set is being applied is not charged
//!   for that same pop.
//! - Clearing the undo stack evicts every state with a running countdown.

use crate::model::message::{GlobalId, Location, Message};
use crate::session::transport::SharedTransport;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Fallback source consulted on local misses.
pub trait StateParent {
    fn find_state(&mut self, global_id: GlobalId) -> Option<Message>;
    fn unregister_state(&mut self, global_id: GlobalId);
    fn unregister_all_states(&mut self);
}

/// Historical-state cache.
#[derive(Default)]
pub struct StateLocator {
    states: BTreeMap<GlobalId, Message>,
    parent: Option<Box<dyn StateParent>>,
    ttl: Option<BTreeMap<GlobalId, usize>>,
    started_in_pop: Option<BTreeSet<GlobalId>>,
}

impl StateLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Box<dyn StateParent>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn set_parent(&mut self, parent: Option<Box<dyn StateParent>>) {
        self.parent = parent;
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Stores `state` as the full state of its object.
    pub fn register_state(&mut self, state: Message) {
        if let Some(ttl) = self.ttl.as_mut() {
            if ttl.remove(&state.global_id).is_some() {
                debug!(
                    "event=state_gc module=state_locator status=cancel global_id={}",
                    state.global_id
                );
            }
        }
        self.states.insert(state.global_id, state);
    }

    /// Looks up a state locally, then in the parent when `use_parent`.
    pub fn find_state(&mut self, global_id: GlobalId, use_parent: bool) -> Option<Message> {
        if let Some(state) = self.states.get(&global_id) {
            return Some(state.clone());
        }
        if !use_parent {
            return None;
        }
        self.parent.as_mut()?.find_state(global_id)
    }

    pub fn local_state(&self, global_id: GlobalId) -> Option<&Message> {
        self.states.get(&global_id)
    }

    pub fn contains(&self, global_id: GlobalId) -> bool {
        self.states.contains_key(&global_id)
    }

    /// Evicts one state; `force` also evicts it from the parent.
    pub fn unregister_state(&mut self, global_id: GlobalId, force: bool) -> bool {
        let removed = self.states.remove(&global_id).is_some();
        if let Some(ttl) = self.ttl.as_mut() {
            ttl.remove(&global_id);
        }
        if force {
            if let Some(parent) = self.parent.as_mut() {
                parent.unregister_state(global_id);
            }
        }
        removed
    }

    pub fn unregister_all_states(&mut self, force: bool) {
        self.states.clear();
        if let Some(ttl) = self.ttl.as_mut() {
            ttl.clear();
        }
        if force {
            if let Some(parent) = self.parent.as_mut() {
                parent.unregister_all_states();
            }
        }
    }

    /// Enables undo-anchored GC.
    pub fn attach_undo_stack(&mut self) {
        self.ttl.get_or_insert_with(BTreeMap::new);
    }

    /// Disables GC; pending countdowns are dropped and their states kept.
    pub fn detach_undo_stack(&mut self) {
        self.ttl = None;
        self.started_in_pop = None;
    }

    pub fn is_undo_stack_attached(&self) -> bool {
        self.ttl.is_some()
    }

    /// Starts the countdown for a state whose object was unregistered.
    pub fn on_object_unregistered(&mut self, global_id: GlobalId, depth: usize) {
        let Some(ttl) = self.ttl.as_mut() else {
            return;
        };
        if self.states.contains_key(&global_id) {
            ttl.insert(global_id, depth);
            if let Some(started) = self.started_in_pop.as_mut() {
                started.insert(global_id);
            }
            debug!(
                "event=state_gc module=state_locator status=start global_id={global_id} ttl={depth}"
            );
        }
    }

    /// Marks that an undo set is about to be applied; see `on_undo_stack_pop`.
    pub fn begin_undo_stack_pop(&mut self) {
        if self.ttl.is_some() {
            self.started_in_pop = Some(BTreeSet::new());
        }
    }

    /// Consumes one unit of every countdown; returns the evicted ids.
    ///
    /// Countdowns started since `begin_undo_stack_pop` are left untouched.
    pub fn on_undo_stack_pop(&mut self) -> Vec<GlobalId> {
        let exempt = self.started_in_pop.take().unwrap_or_default();
        let Some(ttl) = self.ttl.as_mut() else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        ttl.retain(|global_id, remaining| {
            if exempt.contains(global_id) {
                true
            } else if *remaining == 0 {
                evicted.push(*global_id);
                false
            } else {
                *remaining -= 1;
                true
            }
        });
        self.evict(&evicted);
        evicted
    }

    /// Evicts every state with a running countdown.
    pub fn on_undo_stack_clear(&mut self) -> Vec<GlobalId> {
        let Some(ttl) = self.ttl.as_mut() else {
            return Vec::new();
        };
        let evicted: Vec<GlobalId> = std::mem::take(ttl).into_keys().collect();
        self.evict(&evicted);
        evicted
    }

    pub fn pending_ttl(&self, global_id: GlobalId) -> Option<usize> {
        self.ttl.as_ref()?.get(&global_id).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn ids(&self) -> Vec<GlobalId> {
        self.states.keys().copied().collect()
    }

    /// Copies every locally stored state, ordered by id.
    pub fn export_states(&self) -> Vec<Message> {
        self.states.values().cloned().collect()
    }

    pub fn import_states(&mut self, states: impl IntoIterator<Item = Message>) {
        for state in states {
            self.register_state(state);
        }
    }

    fn evict(&mut self, ids: &[GlobalId]) {
        for global_id in ids {
            self.states.remove(global_id);
            debug!("event=state_gc module=state_locator status=evict global_id={global_id}");
        }
    }
}

/// Parent backed by the transport; caches successful fetches.
pub struct RemoteStateParent {
    transport: SharedTransport,
    cache: BTreeMap<GlobalId, Message>,
}

impl RemoteStateParent {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            cache: BTreeMap::new(),
        }
    }

    pub fn cached_ids(&self) -> Vec<GlobalId> {
        self.cache.keys().copied().collect()
    }
}

impl StateParent for RemoteStateParent {
    fn find_state(&mut self, global_id: GlobalId) -> Option<Message> {
        if let Some(state) = self.cache.get(&global_id) {
            return Some(state.clone());
        }

        let request = Message::new(global_id, Location::DATA_SERVER);
        let reply = match self.transport.borrow_mut().pull_state(&request) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    "event=state_fetch module=state_locator status=error global_id={global_id} error={err}"
                );
                return None;
            }
        };

        let state = reply.filter(|state| state.extensions.xml_group.is_some())?;
        debug!("event=state_fetch module=state_locator status=ok global_id={global_id}");
        self.cache.insert(global_id, state.clone());
        Some(state)
    }

    fn unregister_state(&mut self, global_id: GlobalId) {
        self.cache.remove(&global_id);
    }

    fn unregister_all_states(&mut self) {
        self.cache.clear();
    }
}
