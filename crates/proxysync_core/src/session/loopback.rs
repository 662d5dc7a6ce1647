//! In-process server used by tests and the CLI.
//!
//! # Responsibility
//! - Implement `Transport` against server-side objects living in memory.
//! - Apply pushed properties to backing objects through their commands.
//!
//! # Invariants
//! - A server object is created from the first pushed message carrying its
//!   `(xml_group, xml_name)` identity.
//! - Objects without a backing object accept pushes as no-ops.

use crate::error::{SyncError, SyncResult};
use crate::model::message::{GlobalId, Location, Message, MessageExtensions, Variant};
use crate::proxy::definition::ProxyFactory;
use crate::proxy::property::KeepReferences;
use crate::proxy::Proxy;
use crate::session::transport::{BackingFactory, BackingObject, Transport};
use log::debug;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Backing object that records invoked commands and answers queries from
/// the last invoked value.
#[derive(Debug, Clone, Default)]
pub struct MemoryBacking {
    values: BTreeMap<String, Variant>,
    invocations: Vec<String>,
}

impl MemoryBacking {
    pub fn with_value(mut self, command: impl Into<String>, value: Variant) -> Self {
        self.values.insert(command.into(), value);
        self
    }

    pub fn invocations(&self) -> &[String] {
        &self.invocations
    }
}

impl BackingObject for MemoryBacking {
    fn invoke(&mut self, command: &str, value: &Variant) -> SyncResult<()> {
        self.values.insert(command.to_string(), value.clone());
        self.invocations.push(command.to_string());
        Ok(())
    }

    fn query(&self, command: &str) -> Option<Variant> {
        self.values.get(command).cloned()
    }
}

/// Creates `MemoryBacking` objects, optionally preloaded per type.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackingFactory {
    presets: BTreeMap<(String, String), MemoryBacking>,
    unbacked: Vec<(String, String)>,
}

impl MemoryBackingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preloads a query reply for every backing object of one type.
    pub fn with_reply(
        mut self,
        group: &str,
        name: &str,
        command: impl Into<String>,
        value: Variant,
    ) -> Self {
        let key = (group.to_string(), name.to_string());
        let preset = self.presets.remove(&key).unwrap_or_default();
        self.presets.insert(key, preset.with_value(command, value));
        self
    }

    /// Makes the type have no backing object at all.
    pub fn without_backing(mut self, group: &str, name: &str) -> Self {
        self.unbacked.push((group.to_string(), name.to_string()));
        self
    }
}

impl BackingFactory for MemoryBackingFactory {
    fn create(&self, xml_group: &str, xml_name: &str) -> Option<Box<dyn BackingObject>> {
        let key = (xml_group.to_string(), xml_name.to_string());
        if self.unbacked.contains(&key) {
            return None;
        }
        let backing = self.presets.get(&key).cloned().unwrap_or_default();
        Some(Box::new(backing))
    }
}

struct ServerObject {
    proxy: Proxy,
    backing: Option<Box<dyn BackingObject>>,
    extensions: MessageExtensions,
    location: Location,
}

/// Transport whose "servers" are plain maps in this process.
pub struct LoopbackTransport {
    client_id: u32,
    next_global_id: GlobalId,
    factory: Rc<dyn ProxyFactory>,
    backing_factory: Box<dyn BackingFactory>,
    objects: BTreeMap<GlobalId, ServerObject>,
    pushed: Vec<Message>,
    deleted: Vec<GlobalId>,
}

impl LoopbackTransport {
    pub fn new(client_id: u32, factory: Rc<dyn ProxyFactory>) -> Self {
        Self {
            client_id,
            next_global_id: crate::model::message::FIRST_DYNAMIC_ID,
            factory,
            backing_factory: Box::new(MemoryBackingFactory::new()),
            objects: BTreeMap::new(),
            pushed: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn with_backing_factory(mut self, backing_factory: Box<dyn BackingFactory>) -> Self {
        self.backing_factory = backing_factory;
        self
    }

    /// Starts id reservations at `first` instead of the first dynamic id.
    pub fn with_first_global_id(mut self, first: GlobalId) -> Self {
        self.next_global_id = first;
        self
    }

    /// Every message received, in arrival order.
    pub fn pushed(&self) -> &[Message] {
        &self.pushed
    }

    pub fn deleted(&self) -> &[GlobalId] {
        &self.deleted
    }

    pub fn has_object(&self, global_id: GlobalId) -> bool {
        self.objects.contains_key(&global_id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Last value a command received on the server object.
    pub fn backing_value(&self, global_id: GlobalId, command: &str) -> Option<Variant> {
        self.objects
            .get(&global_id)?
            .backing
            .as_ref()?
            .query(command)
    }

    fn create_object(&self, msg: &Message) -> SyncResult<ServerObject> {
        let ext = &msg.extensions;
        let (Some(group), Some(name)) = (ext.xml_group.as_deref(), ext.xml_name.as_deref()) else {
            return Err(SyncError::Transport(format!(
                "object {} is unknown to the server and the message carries no type",
                msg.global_id
            )));
        };

        let proxy = self
            .factory
            .new_proxy(group, name, ext.xml_sub_proxy_name.as_deref())
            .ok_or_else(|| SyncError::UnknownProxyType {
                group: group.to_string(),
                name: name.to_string(),
            })?;
        debug!(
            "event=object_create module=loopback status=ok global_id={} group={group} name={name}",
            msg.global_id
        );
        Ok(ServerObject {
            proxy,
            backing: self.backing_factory.create(group, name),
            extensions: MessageExtensions::default(),
            location: msg.location,
        })
    }
}

impl Transport for LoopbackTransport {
    fn client_id(&self) -> u32 {
        self.client_id
    }

    fn reserve_global_ids(&mut self, count: u32) -> SyncResult<GlobalId> {
        if count == 0 {
            return Err(SyncError::Transport("empty id reservation".to_string()));
        }
        let first = self.next_global_id;
        self.next_global_id = first
            .checked_add(count)
            .ok_or_else(|| SyncError::Transport("global id space exhausted".to_string()))?;
        Ok(first)
    }

    fn push_state(&mut self, msg: &Message) -> SyncResult<()> {
        self.pushed.push(msg.clone());
        if msg.extensions.share_only {
            return Ok(());
        }

        if !self.objects.contains_key(&msg.global_id) {
            let object = self.create_object(msg)?;
            self.objects.insert(msg.global_id, object);
        }
        let object = self
            .objects
            .get_mut(&msg.global_id)
            .ok_or(SyncError::NotRegistered(msg.global_id))?;

        let report = object.proxy.load_state(msg, &mut KeepReferences)?;
        if let Some(backing) = object.backing.as_mut() {
            for name in &report.changed {
                if let Some(property) = object.proxy.property(name) {
                    property.push(backing.as_mut())?;
                }
            }
        }

        let ext = &msg.extensions;
        if ext.xml_group.is_some() {
            object.extensions.xml_group = ext.xml_group.clone();
            object.extensions.xml_name = ext.xml_name.clone();
            object.extensions.xml_sub_proxy_name = ext.xml_sub_proxy_name.clone();
        }
        if !ext.sub_proxies.is_empty() {
            object.extensions.sub_proxies = ext.sub_proxies.clone();
        }
        object.location = object.location | msg.location;
        Ok(())
    }

    fn pull_state(&mut self, request: &Message) -> SyncResult<Option<Message>> {
        let Some(object) = self.objects.get_mut(&request.global_id) else {
            return Ok(None);
        };

        let full = request.properties.is_empty();
        let names: Vec<String> = if full {
            object
                .proxy
                .properties()
                .map(|property| property.name().to_string())
                .collect()
        } else {
            request.property_names().map(str::to_string).collect()
        };

        let mut reply = Message::new(request.global_id, object.location);
        for name in &names {
            if let Some(property) = object.proxy.property_mut(name) {
                property.pull(object.backing.as_deref(), &mut reply);
            }
        }
        if full {
            reply.extensions = object.extensions.clone();
        }
        Ok(Some(reply))
    }

    fn delete_object(&mut self, global_id: GlobalId, _location: Location) -> SyncResult<()> {
        if self.objects.remove(&global_id).is_some() {
            debug!("event=object_delete module=loopback status=ok global_id={global_id}");
        }
        self.deleted.push(global_id);
        Ok(())
    }
}
