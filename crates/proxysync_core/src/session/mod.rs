//! Client session: registry, routing, undo, and collaboration context.
//!
//! # Responsibility
//! - Own the proxy registry (arena keyed by global id) and id allocation.
//! - Route pushed state to the state locator, the undo builder, the relation
//!   table, and the transport.
//! - Apply remote notifications under an in-flight guard.
//!
//! # Invariants
//! - Partial pushes merge into the stored full state; they never replace it.
//! - Undo capture is off while applying undo/redo, while processing remote
//!   notifications, and while more than one client is connected.
//! - Messages received during a notification batch are never echoed back to
//!   the transport.
//!
//! # See also
//! - `locator` for state storage and on-demand proxy creation.
//! - `undo` for recorded elements.

pub mod config;
pub mod diagnostics;
pub mod loopback;
pub mod relations;
pub mod transport;

use crate::collaboration::{CollaborationManager, CollaborationOutcome};
use crate::error::{SyncError, SyncResult};
use crate::locator::deserializer::Deserializer;
use crate::locator::proxy_locator::{LocatorResolver, ProxyLocator};
use crate::locator::state_locator::{RemoteStateParent, StateLocator};
use crate::model::message::{GlobalId, Message};
use crate::proxy::definition::ProxyFactory;
use crate::proxy::{LoadReport, ProxyHandle};
use crate::undo::builder::UndoStackBuilder;
use crate::undo::element::UndoOutcome;
use crate::undo::stack::UndoStack;
use config::SessionConfig;
use diagnostics::{Diagnostic, Diagnostics};
use log::{debug, info, warn};
use relations::RelationTable;
use std::collections::BTreeMap;
use std::rc::Rc;
use transport::SharedTransport;

#[derive(Debug, Clone, Copy, Default)]
struct IdPool {
    next: GlobalId,
    end: GlobalId,
}

/// One client's view of the synchronized object graph.
pub struct Session {
    config: SessionConfig,
    transport: SharedTransport,
    factory: Rc<dyn ProxyFactory>,
    registry: BTreeMap<GlobalId, ProxyHandle>,
    relations: RelationTable,
    ids: IdPool,
    state_locator: StateLocator,
    undo_builder: UndoStackBuilder,
    undo_stack: UndoStack,
    collaboration: CollaborationManager,
    processing_notification: bool,
    applying_undo: bool,
    diagnostics: Diagnostics,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        transport: SharedTransport,
        factory: Rc<dyn ProxyFactory>,
    ) -> Self {
        let mut state_locator =
            StateLocator::with_parent(Box::new(RemoteStateParent::new(transport.clone())));
        if config.undo_enabled {
            state_locator.attach_undo_stack();
        }
        let local_user = transport.borrow().client_id();
        info!(
            "event=session_open module=session status=ok client_id={local_user} undo_depth={}",
            config.undo_depth
        );

        Self {
            undo_stack: UndoStack::new(config.undo_depth),
            collaboration: CollaborationManager::new(local_user, &config.camera_proxy_names),
            config,
            transport,
            factory,
            registry: BTreeMap::new(),
            relations: RelationTable::default(),
            ids: IdPool::default(),
            state_locator,
            undo_builder: UndoStackBuilder::new(),
            processing_notification: false,
            applying_undo: false,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> SharedTransport {
        self.transport.clone()
    }

    pub fn factory(&self) -> Rc<dyn ProxyFactory> {
        self.factory.clone()
    }

    /// Registered proxy for `global_id` (`GetRemoteObject`).
    pub fn proxy(&self, global_id: GlobalId) -> Option<ProxyHandle> {
        self.registry.get(&global_id).cloned()
    }

    pub fn remote_object(&self, global_id: GlobalId) -> Option<ProxyHandle> {
        self.proxy(global_id)
    }

    pub fn registered_ids(&self) -> Vec<GlobalId> {
        self.registry.keys().copied().collect()
    }

    pub fn relations(&self) -> &RelationTable {
        &self.relations
    }

    pub fn state_locator(&self) -> &StateLocator {
        &self.state_locator
    }

    pub fn state_locator_mut(&mut self) -> &mut StateLocator {
        &mut self.state_locator
    }

    pub fn collaboration(&self) -> &CollaborationManager {
        &self.collaboration
    }

    pub fn collaboration_mut(&mut self) -> &mut CollaborationManager {
        &mut self.collaboration
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    pub fn is_processing_notification(&self) -> bool {
        self.processing_notification
    }

    pub fn is_applying_undo(&self) -> bool {
        self.applying_undo
    }

    /// Locator configured from the session settings.
    pub fn new_locator(&self, deserializer: Option<Rc<Deserializer>>) -> ProxyLocator {
        let mut locator = ProxyLocator::new();
        locator.set_use_session_registry(self.config.locator_uses_session_registry);
        locator.set_deserializer(deserializer);
        locator
    }

    /// Creates and registers a proxy of the given type.
    pub fn create_proxy(&mut self, xml_group: &str, xml_name: &str) -> SyncResult<ProxyHandle> {
        let proxy = self
            .factory
            .new_proxy(xml_group, xml_name, None)
            .ok_or_else(|| SyncError::UnknownProxyType {
                group: xml_group.to_string(),
                name: xml_name.to_string(),
            })?
            .into_handle();
        self.register_proxy(&proxy)?;
        Ok(proxy)
    }

    /// Registers `proxy` and its sub-proxies, allocating missing ids.
    pub fn register_proxy(&mut self, proxy: &ProxyHandle) -> SyncResult<GlobalId> {
        let existing = proxy.borrow().global_id();
        let global_id = match existing {
            Some(global_id) => global_id,
            None => {
                let global_id = self.allocate_global_id()?;
                proxy.borrow().remote().assign_global_id(global_id)?;
                global_id
            }
        };
        self.insert_registered(global_id, proxy)?;

        for sub in sub_proxy_handles(proxy) {
            self.register_proxy(&sub)?;
        }
        debug!("event=proxy_register module=session status=ok global_id={global_id}");
        Ok(global_id)
    }

    /// Registers `proxy` under a known id, e.g. when restoring stored state.
    pub fn register_proxy_with_id(
        &mut self,
        proxy: &ProxyHandle,
        global_id: GlobalId,
    ) -> SyncResult<()> {
        self.check_free(global_id, proxy)?;
        proxy.borrow().remote().assign_global_id(global_id)?;
        self.insert_registered(global_id, proxy)
    }

    /// Registers a deserialized proxy and its sub-proxies, all or nothing.
    pub(crate) fn register_restored_proxy(
        &mut self,
        proxy: &ProxyHandle,
        global_id: GlobalId,
    ) -> SyncResult<()> {
        self.check_free(global_id, proxy)?;
        let subs = sub_proxy_handles(proxy);
        for sub in &subs {
            let sub_id = sub.borrow().global_id();
            if let Some(sub_id) = sub_id {
                self.check_free(sub_id, sub)?;
            }
        }

        self.register_proxy_with_id(proxy, global_id)?;
        for sub in &subs {
            self.register_proxy(sub)?;
        }
        Ok(())
    }

    /// Drops a deserialized proxy whose stored state could not be applied.
    ///
    /// Nothing is recorded for undo.
    pub(crate) fn discard_restored_proxy(&mut self, global_id: GlobalId) -> SyncResult<bool> {
        self.unregister_inner(global_id, false)
    }

    /// Unregisters an object and destroys its server-side counterpart.
    ///
    /// The last state stays in the state locator under GC policy.
    pub fn unregister_proxy(&mut self, global_id: GlobalId) -> SyncResult<bool> {
        self.unregister_inner(global_id, true)
    }

    /// Sends a partial or full update for one object.
    pub fn push_state(&mut self, msg: &Message) -> SyncResult<()> {
        if msg.global_id == 0 {
            return Err(SyncError::NotRegistered(0));
        }

        if !msg.extensions.share_only {
            let previous = self.state_locator.local_state(msg.global_id).cloned();
            let mut next = previous
                .clone()
                .unwrap_or_else(|| Message::new(msg.global_id, msg.location));
            next.merge_from(msg);

            if self.capture_active() {
                match previous {
                    Some(previous) if previous != next => {
                        self.undo_builder
                            .on_state_change(msg.global_id, previous, next.clone());
                    }
                    Some(_) => {}
                    None if next.extensions.xml_sub_proxy_name.is_none() => {
                        self.undo_builder.on_create_object(next.clone());
                    }
                    None => {}
                }
            }
            self.relations.update_consumer(msg.global_id, &next);
            self.state_locator.register_state(next);
        }

        if msg.location.targets_server() && !self.processing_notification {
            self.transport.borrow_mut().push_state(msg)?;
        }
        debug!(
            "event=state_push module=session status=ok global_id={} properties={}",
            msg.global_id,
            msg.properties.len()
        );
        Ok(())
    }

    /// Fetches server-side state; an empty request asks for the full state.
    pub fn pull_state(&mut self, request: &Message) -> SyncResult<Option<Message>> {
        self.transport.borrow_mut().pull_state(request)
    }

    pub fn begin_undo_set(&mut self, label: &str) {
        self.undo_builder.begin(label);
    }

    /// Closes one bracket level; returns whether a set was pushed.
    pub fn end_undo_set(&mut self) -> bool {
        self.undo_builder.end(&mut self.undo_stack)
    }

    pub fn undo_stack(&self) -> &UndoStack {
        &self.undo_stack
    }

    pub fn undo_builder_mut(&mut self) -> &mut UndoStackBuilder {
        &mut self.undo_builder
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo_stack.can_redo()
    }

    /// Reverts the most recent undo set.
    ///
    /// Elements whose target is gone are skipped and reported as
    /// `TargetNotFound`; the set still moves to the redo stack.
    pub fn undo(&mut self) -> SyncResult<Vec<UndoOutcome>> {
        let Some(set) = self.undo_stack.pop_undo() else {
            return Ok(Vec::new());
        };

        self.state_locator.begin_undo_stack_pop();
        self.applying_undo = true;
        let result = set.undo(self);
        self.applying_undo = false;

        info!(
            "event=undo_apply module=session status={} label={:?}",
            if result.is_ok() { "ok" } else { "error" },
            set.label()
        );
        self.undo_stack.push_redo(set);
        self.state_locator.on_undo_stack_pop();

        let outcomes = result?;
        self.record_outcomes(&outcomes);
        Ok(outcomes)
    }

    /// Re-applies the most recently undone set.
    pub fn redo(&mut self) -> SyncResult<Vec<UndoOutcome>> {
        let Some(set) = self.undo_stack.pop_redo() else {
            return Ok(Vec::new());
        };

        self.applying_undo = true;
        let result = set.redo(self);
        self.applying_undo = false;

        info!(
            "event=redo_apply module=session status={} label={:?}",
            if result.is_ok() { "ok" } else { "error" },
            set.label()
        );
        self.undo_stack.push_undone(set);

        let outcomes = result?;
        self.record_outcomes(&outcomes);
        Ok(outcomes)
    }

    /// Drops both stacks and evicts states kept alive for undo.
    pub fn clear_undo_stack(&mut self) {
        self.undo_stack.clear();
        self.undo_builder.clear();
        self.state_locator.on_undo_stack_clear();
    }

    /// Applies a batch of messages received from other clients or servers.
    ///
    /// A deferred camera update is applied once the batch completes.
    pub fn process_remote_notifications(&mut self, messages: &[Message]) {
        self.processing_notification = true;
        for msg in messages {
            if let Err(err) = self.apply_notification(msg) {
                self.diagnostics.record(Diagnostic::NotificationDropped {
                    global_id: msg.global_id,
                    reason: err.to_string(),
                });
            }
        }
        self.processing_notification = false;

        if let Some(camera) = self.collaboration.take_pending_camera() {
            if let Err(err) = self.apply_remote_state(&camera) {
                self.diagnostics.record(Diagnostic::NotificationDropped {
                    global_id: camera.global_id,
                    reason: err.to_string(),
                });
            }
        }
    }

    pub fn promote_to_master(&mut self, user_id: u32) -> SyncResult<bool> {
        let msg = self.collaboration.promote_to_master(user_id);
        self.broadcast(msg)
    }

    pub fn disable_further_connections(&mut self, disable: bool) -> SyncResult<bool> {
        let msg = self.collaboration.disable_further_connections(disable);
        self.broadcast(msg)
    }

    pub fn set_connect_id(&mut self, connect_id: i32) -> SyncResult<bool> {
        let msg = self.collaboration.set_connect_id(connect_id);
        self.broadcast(msg)
    }

    /// Follows a user's camera; returns whether it was broadcast.
    pub fn follow_user(&mut self, user_id: u32) -> SyncResult<bool> {
        let msg = self.collaboration.follow_user(user_id);
        self.broadcast(msg)
    }

    pub fn set_user_label(&mut self, user_id: u32, name: &str) -> SyncResult<()> {
        let msg = self.collaboration.set_user_label(user_id, name);
        self.push_state(&msg)
    }

    /// Shares the stored state of a camera proxy with other clients.
    pub fn share_camera(&mut self, global_id: GlobalId) -> SyncResult<()> {
        let state = self
            .state_locator
            .local_state(global_id)
            .ok_or(SyncError::NotRegistered(global_id))?;
        let msg = self.collaboration.share_camera(state);
        self.push_state(&msg)
    }

    pub(crate) fn record_load_report(&mut self, owner: GlobalId, report: &LoadReport) {
        for (property, reference) in &report.dropped_references {
            self.diagnostics.record(Diagnostic::DroppedReference {
                owner,
                property: property.clone(),
                reference: *reference,
            });
        }
    }

    fn broadcast(&mut self, msg: Option<Message>) -> SyncResult<bool> {
        match msg {
            Some(msg) => {
                self.push_state(&msg)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn record_outcomes(&mut self, outcomes: &[UndoOutcome]) {
        for outcome in outcomes {
            if let UndoOutcome::TargetNotFound(global_id) = outcome {
                self.diagnostics.record(Diagnostic::UndoTargetMissing {
                    global_id: *global_id,
                });
            }
        }
    }

    fn capture_active(&self) -> bool {
        self.config.undo_enabled
            && !self.applying_undo
            && !self.processing_notification
            && self.collaboration.user_count() <= 1
    }

    fn apply_notification(&mut self, msg: &Message) -> SyncResult<()> {
        match self
            .collaboration
            .load_state(msg, self.processing_notification)
        {
            CollaborationOutcome::Roster
            | CollaborationOutcome::Deferred
            | CollaborationOutcome::Ignored => Ok(()),
            CollaborationOutcome::ApplyCamera(camera) => self.apply_remote_state(&camera),
            CollaborationOutcome::NotHandled => self.apply_remote_state(msg),
        }
    }

    fn apply_remote_state(&mut self, msg: &Message) -> SyncResult<()> {
        let global_id = msg.global_id;
        if let Some(proxy) = self.proxy(global_id) {
            let mut locator = self.new_locator(None);
            let report = proxy
                .borrow_mut()
                .load_state(msg, &mut LocatorResolver::new(&mut locator, self))?;
            self.record_load_report(global_id, &report);
            proxy.borrow_mut().mark_all_clean();
            self.merge_remote_state(msg);
            return Ok(());
        }

        if msg.extensions.xml_group.is_none() {
            self.diagnostics.record(Diagnostic::NotificationDropped {
                global_id,
                reason: "unknown object without type".to_string(),
            });
            return Ok(());
        }

        let deserializer = Rc::new(Deserializer::from_elements([msg.clone()]));
        let mut locator = self.new_locator(Some(deserializer));
        if locator.locate_proxy(global_id, self).is_none() {
            self.diagnostics.record(Diagnostic::NotificationDropped {
                global_id,
                reason: "proxy type cannot be created".to_string(),
            });
        }
        Ok(())
    }

    fn merge_remote_state(&mut self, msg: &Message) {
        if msg.extensions.share_only {
            return;
        }
        let mut next = self
            .state_locator
            .local_state(msg.global_id)
            .cloned()
            .unwrap_or_else(|| Message::new(msg.global_id, msg.location));
        next.merge_from(msg);
        self.relations.update_consumer(msg.global_id, &next);
        self.state_locator.register_state(next);
    }

    fn unregister_inner(&mut self, global_id: GlobalId, record: bool) -> SyncResult<bool> {
        let Some(proxy) = self.registry.remove(&global_id) else {
            return Ok(false);
        };
        let location = proxy.borrow().remote().location();
        let sub_ids: Vec<GlobalId> = sub_proxy_handles(&proxy)
            .iter()
            .filter_map(|sub| sub.borrow().global_id())
            .collect();

        if record && self.capture_active() {
            if let Some(state) = self.state_locator.local_state(global_id).cloned() {
                self.undo_builder.on_delete_object(state);
            }
        }
        self.relations.remove_object(global_id);
        self.state_locator
            .on_object_unregistered(global_id, self.undo_stack.undo_len());
        self.transport
            .borrow_mut()
            .delete_object(global_id, location)?;
        debug!("event=proxy_unregister module=session status=ok global_id={global_id}");

        for sub_id in sub_ids {
            self.unregister_inner(sub_id, false)?;
        }
        Ok(true)
    }

    fn allocate_global_id(&mut self) -> SyncResult<GlobalId> {
        loop {
            if self.ids.next >= self.ids.end {
                let count = self.config.id_chunk_size.max(1);
                let first = self.transport.borrow_mut().reserve_global_ids(count)?;
                self.ids = IdPool {
                    next: first,
                    end: first.saturating_add(count),
                };
                debug!("event=id_reserve module=session status=ok first={first} count={count}");
            }

            let candidate = self.ids.next;
            self.ids.next += 1;
            if !self.registry.contains_key(&candidate) && !self.state_locator.contains(candidate) {
                return Ok(candidate);
            }
            warn!("event=id_reserve module=session status=skip global_id={candidate} reason=in_use");
        }
    }

    fn check_free(&self, global_id: GlobalId, proxy: &ProxyHandle) -> SyncResult<()> {
        match self.registry.get(&global_id) {
            Some(current) if !Rc::ptr_eq(current, proxy) => {
                Err(SyncError::AlreadyRegistered(global_id))
            }
            _ => Ok(()),
        }
    }

    fn insert_registered(&mut self, global_id: GlobalId, proxy: &ProxyHandle) -> SyncResult<()> {
        self.check_free(global_id, proxy)?;
        self.registry.insert(global_id, proxy.clone());
        Ok(())
    }
}

fn sub_proxy_handles(proxy: &ProxyHandle) -> Vec<ProxyHandle> {
    proxy
        .borrow()
        .sub_proxies()
        .map(|(_, sub)| sub.clone())
        .collect()
}
