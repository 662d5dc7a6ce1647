//! Resolves global ids to live proxies.
//!
//! # Responsibility
//! - Return the same proxy instance for repeated lookups of one id.
//! - Consult, in order: cache, assignment table, session registry, and the
//!   deserializer.
//! - Apply deferred states once the outermost lookup unwinds.
//!
//! # Invariants
//! - Phase 1 (allocation) finishes for the whole reachable graph before any
//!   stored state is applied.
//! - Phase 2 applies states leaves-first: a proxy is loaded and materialized
//!   after every proxy it referenced during phase 1.
//! - A proxy whose state fails to apply is unregistered together with its
//!   owner and sub-proxies, evicted from the cache, and never located again
//!   by this locator.

use crate::locator::deserializer::Deserializer;
use crate::model::message::{GlobalId, Message};
use crate::proxy::property::ReferenceResolver;
use crate::proxy::ProxyHandle;
use crate::session::diagnostics::Diagnostic;
use crate::session::Session;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

struct PendingState {
    owner: GlobalId,
    proxy: ProxyHandle,
    state: Message,
}

pub struct ProxyLocator {
    cache: BTreeMap<GlobalId, ProxyHandle>,
    assigned: BTreeMap<GlobalId, ProxyHandle>,
    use_session_registry: bool,
    deserializer: Option<Rc<Deserializer>>,
    depth: usize,
    draining: bool,
    pending: Vec<PendingState>,
    failed: BTreeSet<GlobalId>,
}

impl Default for ProxyLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyLocator {
    pub fn new() -> Self {
        Self {
            cache: BTreeMap::new(),
            assigned: BTreeMap::new(),
            use_session_registry: true,
            deserializer: None,
            depth: 0,
            draining: false,
            pending: Vec::new(),
            failed: BTreeSet::new(),
        }
    }

    pub fn with_deserializer(deserializer: Rc<Deserializer>) -> Self {
        Self {
            deserializer: Some(deserializer),
            ..Self::new()
        }
    }

    pub fn set_deserializer(&mut self, deserializer: Option<Rc<Deserializer>>) {
        self.deserializer = deserializer;
    }

    pub fn set_use_session_registry(&mut self, enabled: bool) {
        self.use_session_registry = enabled;
    }

    pub fn uses_session_registry(&self) -> bool {
        self.use_session_registry
    }

    /// Returns the proxy for `global_id`, creating it when possible.
    pub fn locate_proxy(&mut self, global_id: GlobalId, session: &mut Session) -> Option<ProxyHandle> {
        if global_id == 0 || self.failed.contains(&global_id) {
            return None;
        }
        if let Some(proxy) = self.cache.get(&global_id) {
            return Some(proxy.clone());
        }
        if let Some(proxy) = self.assigned.get(&global_id).cloned() {
            self.cache.insert(global_id, proxy.clone());
            return Some(proxy);
        }
        if self.use_session_registry {
            if let Some(proxy) = session.proxy(global_id) {
                self.cache.insert(global_id, proxy.clone());
                return Some(proxy);
            }
        }

        let deserializer = self.deserializer.clone()?;
        self.depth += 1;
        let created = deserializer.new_proxy(global_id, self, session);
        self.depth -= 1;

        if self.depth == 0 {
            self.apply_pending(session);
        }
        if self.failed.contains(&global_id) {
            return None;
        }
        created
    }

    /// Overrides automatic creation for one id.
    pub fn assign_proxy(&mut self, global_id: GlobalId, proxy: ProxyHandle) {
        self.assigned.insert(global_id, proxy);
    }

    /// Forgets cached, assigned, and failed proxies.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.assigned.clear();
        self.failed.clear();
    }

    pub fn is_cached(&self, global_id: GlobalId) -> bool {
        self.cache.contains_key(&global_id)
    }

    pub(crate) fn cache_proxy(&mut self, global_id: GlobalId, proxy: ProxyHandle) {
        self.cache.insert(global_id, proxy);
    }

    /// Queues `state` to be applied to `proxy` in phase 2.
    ///
    /// `owner` is the top-level proxy discarded if this state fails.
    pub(crate) fn defer_state(&mut self, owner: GlobalId, proxy: ProxyHandle, state: Message) {
        self.pending.push(PendingState { owner, proxy, state });
    }

    fn apply_pending(&mut self, session: &mut Session) {
        if self.draining {
            return;
        }
        self.draining = true;

        while let Some(PendingState { owner, proxy, state }) = self.pending.pop() {
            if self.failed.contains(&owner) {
                continue;
            }
            let global_id = state.global_id;
            let loaded = proxy
                .borrow_mut()
                .load_state(&state, &mut LocatorResolver::new(self, session));
            let applied = loaded.and_then(|report| {
                session.record_load_report(global_id, &report);
                proxy.borrow_mut().update_vtk_objects(session)
            });

            if let Err(err) = applied {
                session.diagnostics_mut().record(Diagnostic::DeserializationFailed {
                    global_id,
                    reason: err.to_string(),
                });
                self.discard(owner, session);
                continue;
            }
            debug!("event=proxy_locate module=locator status=ok global_id={global_id}");
        }

        self.draining = false;
    }

    fn discard(&mut self, owner: GlobalId, session: &mut Session) {
        let mut ids = vec![owner];
        if let Some(proxy) = self.cache.get(&owner) {
            ids.extend(
                proxy
                    .borrow()
                    .sub_proxies()
                    .filter_map(|(_, sub)| sub.borrow().global_id()),
            );
        }
        for global_id in &ids {
            self.cache.remove(global_id);
            self.failed.insert(*global_id);
        }
        if let Err(err) = session.discard_restored_proxy(owner) {
            warn!("event=proxy_locate module=locator status=error global_id={owner} error={err}");
        }
        warn!("event=proxy_locate module=locator status=discard global_id={owner}");
    }
}

/// Resolves references by locating them, creating proxies on demand.
pub struct LocatorResolver<'a> {
    locator: &'a mut ProxyLocator,
    session: &'a mut Session,
}

impl<'a> LocatorResolver<'a> {
    pub fn new(locator: &'a mut ProxyLocator, session: &'a mut Session) -> Self {
        Self { locator, session }
    }
}

impl ReferenceResolver for LocatorResolver<'_> {
    fn resolve_reference(&mut self, global_id: GlobalId) -> bool {
        self.locator.locate_proxy(global_id, self.session).is_some()
    }
}
