//! Builds proxies from stored state.
//!
//! # Responsibility
//! - Find a stored definition for an id (element cache, then state locator).
//! - Create, identify, register, and cache the proxy (phase 1) and queue its
//!   state for the locator to apply (phase 2).
//!
//! # Invariants
//! - On failure nothing is registered or cached; a state that fails to apply
//!   in phase 2 makes the locator discard the proxy again.
//! - Sub-proxies keep the ids recorded in their parent's state.

use crate::locator::proxy_locator::ProxyLocator;
use crate::model::message::{GlobalId, Message};
use crate::proxy::ProxyHandle;
use crate::session::Session;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct Deserializer {
    elements: BTreeMap<GlobalId, Message>,
    use_state_locator: bool,
    use_parent: bool,
}

impl Default for Deserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer {
    /// Deserializer backed by the session state locator and its parent.
    pub fn new() -> Self {
        Self {
            elements: BTreeMap::new(),
            use_state_locator: true,
            use_parent: true,
        }
    }

    /// Deserializer preferring the given states over the state locator.
    pub fn from_elements(elements: impl IntoIterator<Item = Message>) -> Self {
        let mut deserializer = Self::new();
        for element in elements {
            deserializer.elements.insert(element.global_id, element);
        }
        deserializer
    }

    pub fn with_state_locator(mut self, enabled: bool) -> Self {
        self.use_state_locator = enabled;
        self
    }

    pub fn with_parent_lookup(mut self, enabled: bool) -> Self {
        self.use_parent = enabled;
        self
    }

    pub fn element_ids(&self) -> Vec<GlobalId> {
        self.elements.keys().copied().collect()
    }

    /// Creates and registers the proxy stored under `global_id`.
    ///
    /// Returns `None` when no definition exists or the factory cannot build
    /// the recorded type.
    pub fn new_proxy(
        &self,
        global_id: GlobalId,
        locator: &mut ProxyLocator,
        session: &mut Session,
    ) -> Option<ProxyHandle> {
        let state = self.find_definition(global_id, session)?;
        let ext = &state.extensions;
        let (Some(group), Some(name)) = (ext.xml_group.as_deref(), ext.xml_name.as_deref()) else {
            debug!("event=proxy_create module=deserializer status=skip global_id={global_id} reason=no_type");
            return None;
        };

        let Some(proxy) = session
            .factory()
            .new_proxy(group, name, ext.xml_sub_proxy_name.as_deref())
        else {
            warn!(
                "event=proxy_create module=deserializer status=error global_id={global_id} group={group} name={name} reason=unknown_type"
            );
            return None;
        };
        let proxy = proxy.with_location(state.location).into_handle();

        let mut sub_states = Vec::new();
        let mut sub_ids = BTreeSet::new();
        for entry in &ext.sub_proxies {
            let Some(sub) = proxy.borrow().sub_proxy(&entry.name) else {
                continue;
            };
            if let Err(err) = sub.borrow().remote().assign_global_id(entry.global_id) {
                warn!("event=proxy_create module=deserializer status=error global_id={global_id} error={err}");
                return None;
            }
            sub_ids.insert(entry.global_id);
            if let Some(sub_state) = self.find_definition(entry.global_id, session) {
                sub_states.push((sub, sub_state));
            }
        }

        if let Err(err) = session.register_restored_proxy(&proxy, global_id) {
            warn!("event=proxy_create module=deserializer status=error global_id={global_id} error={err}");
            return None;
        }
        locator.cache_proxy(global_id, proxy.clone());
        locator.defer_state(global_id, proxy.clone(), state.clone());
        for (sub, sub_state) in &sub_states {
            locator.cache_proxy(sub_state.global_id, sub.clone());
            locator.defer_state(global_id, sub.clone(), sub_state.clone());
        }
        debug!("event=proxy_create module=deserializer status=ok global_id={global_id} group={group} name={name}");

        let mut references = state.referenced_ids();
        for (_, sub_state) in &sub_states {
            references.extend(sub_state.referenced_ids());
        }
        for reference in references {
            if reference != global_id && !sub_ids.contains(&reference) {
                locator.locate_proxy(reference, session);
            }
        }
        Some(proxy)
    }

    fn find_definition(&self, global_id: GlobalId, session: &mut Session) -> Option<Message> {
        if let Some(state) = self.elements.get(&global_id) {
            return Some(state.clone());
        }
        if !self.use_state_locator {
            return None;
        }
        session
            .state_locator_mut()
            .find_state(global_id, self.use_parent)
    }
}
