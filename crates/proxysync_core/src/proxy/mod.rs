//! Client-side stand-ins for remote objects.
//!
//! # Responsibility
//! - Hold named properties and sub-proxies of one remote object.
//! - Produce full/partial state messages and apply incoming ones.
//! - Push pending changes through the session (`update_vtk_objects`).
//!
//! # Invariants
//! - Prototype proxies never push state.
//! - Sub-proxies are materialized before their parent.
//! - Information-only properties never appear in a delta.
//!
//! # See also
//! - `proxy::property` for per-property codecs.
//! - `locator` for on-demand reconstruction from stored state.

pub mod definition;
pub mod property;

use crate::error::{SyncError, SyncResult};
use crate::model::message::{GlobalId, Location, Message, SubProxyEntry, Variant};
use crate::proxy::property::{KeepReferences, Property, ProxySlot, ReferenceResolver};
use crate::remote::RemoteObject;
use crate::session::Session;
use log::debug;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Shared single-threaded proxy handle.
pub type ProxyHandle = Rc<RefCell<Proxy>>;

/// What a `load_state` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub changed: Vec<String>,
    /// `(property, referenced id)` pairs dropped as unresolvable.
    pub dropped_references: Vec<(String, GlobalId)>,
    /// Entries naming properties this proxy does not declare.
    pub unknown_properties: Vec<String>,
}

/// Client-side object mirroring one remote object.
#[derive(Debug)]
pub struct Proxy {
    remote: RemoteObject,
    xml_group: String,
    xml_name: String,
    xml_sub_proxy_name: Option<String>,
    properties: BTreeMap<String, Property>,
    sub_proxies: BTreeMap<String, ProxyHandle>,
    materialized: bool,
}

impl Proxy {
    pub fn new(xml_group: impl Into<String>, xml_name: impl Into<String>) -> Self {
        Self {
            remote: RemoteObject::new(Location::DATA_SERVER),
            xml_group: xml_group.into(),
            xml_name: xml_name.into(),
            xml_sub_proxy_name: None,
            properties: BTreeMap::new(),
            sub_proxies: BTreeMap::new(),
            materialized: false,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.remote.set_location(location);
        self
    }

    pub fn with_sub_proxy_name(mut self, name: Option<String>) -> Self {
        self.xml_sub_proxy_name = name;
        self
    }

    pub fn into_handle(self) -> ProxyHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn remote(&self) -> &RemoteObject {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut RemoteObject {
        &mut self.remote
    }

    pub fn global_id(&self) -> Option<GlobalId> {
        self.remote.global_id()
    }

    pub fn xml_group(&self) -> &str {
        &self.xml_group
    }

    pub fn xml_name(&self) -> &str {
        &self.xml_name
    }

    pub fn xml_sub_proxy_name(&self) -> Option<&str> {
        self.xml_sub_proxy_name.as_deref()
    }

    /// Returns whether the backing object has received a full state.
    pub fn is_materialized(&self) -> bool {
        self.materialized
    }

    pub fn add_property(&mut self, property: Property) {
        self.properties
            .insert(property.name().to_string(), property);
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.get_mut(name)
    }

    pub fn require_property_mut(&mut self, name: &str) -> SyncResult<&mut Property> {
        self.properties
            .get_mut(name)
            .ok_or_else(|| SyncError::UnknownProperty(name.to_string()))
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    pub fn add_sub_proxy(&mut self, name: impl Into<String>, proxy: ProxyHandle) {
        self.sub_proxies.insert(name.into(), proxy);
    }

    pub fn sub_proxy(&self, name: &str) -> Option<ProxyHandle> {
        self.sub_proxies.get(name).cloned()
    }

    pub fn sub_proxies(&self) -> impl Iterator<Item = (&str, &ProxyHandle)> {
        self.sub_proxies
            .iter()
            .map(|(name, proxy)| (name.as_str(), proxy))
    }

    /// Non-null references held by proxy-valued properties.
    pub fn producers(&self) -> Vec<(String, ProxySlot)> {
        self.properties
            .values()
            .filter_map(|property| {
                property
                    .proxies()
                    .ok()
                    .map(|slots| (property.name(), slots))
            })
            .flat_map(|(name, slots)| {
                slots
                    .iter()
                    .filter(|slot| !slot.is_null())
                    .map(move |slot| (name.to_string(), *slot))
            })
            .collect()
    }

    /// Returns whether any synchronized property has unpushed changes.
    pub fn is_dirty(&self) -> bool {
        self.properties
            .values()
            .any(|property| property.is_modified() && !property.is_information_only())
    }

    pub fn mark_all_clean(&mut self) {
        for property in self.properties.values_mut() {
            property.set_modified(false);
        }
    }

    pub fn mark_all_modified(&mut self) {
        for property in self.properties.values_mut() {
            if !property.is_information_only() {
                property.set_modified(true);
            }
        }
    }

    /// Partial update holding only modified synchronized properties.
    pub fn delta_state(&self) -> SyncResult<Message> {
        let mut msg = Message::new(self.remote.require_global_id()?, self.remote.location());
        for property in self.properties.values() {
            if property.is_modified() && !property.is_information_only() {
                property.write_to(&mut msg);
            }
        }
        Ok(msg)
    }

    /// Complete state including identity and sub-proxy entries.
    pub fn full_state(&self) -> SyncResult<Message> {
        let mut msg = Message::new(self.remote.require_global_id()?, self.remote.location());
        for property in self.properties.values() {
            property.write_to(&mut msg);
        }
        msg.extensions.xml_group = Some(self.xml_group.clone());
        msg.extensions.xml_name = Some(self.xml_name.clone());
        msg.extensions.xml_sub_proxy_name = self.xml_sub_proxy_name.clone();
        for (name, sub) in &self.sub_proxies {
            if let Some(global_id) = sub.borrow().global_id() {
                msg.extensions.sub_proxies.push(SubProxyEntry {
                    name: name.clone(),
                    global_id,
                });
            }
        }
        Ok(msg)
    }

    /// Applies every entry of `msg` to the matching property.
    ///
    /// Changed properties are left marked modified so the next
    /// `update_vtk_objects` forwards them. Unknown names are skipped.
    pub fn load_state(
        &mut self,
        msg: &Message,
        resolver: &mut dyn ReferenceResolver,
    ) -> SyncResult<LoadReport> {
        let mut report = LoadReport::default();
        for (offset, entry) in msg.properties.iter().enumerate() {
            let Some(property) = self.properties.get_mut(&entry.name) else {
                debug!(
                    "event=state_load module=proxy status=skip global_id={} property={}",
                    msg.global_id, entry.name
                );
                report.unknown_properties.push(entry.name.clone());
                continue;
            };

            let outcome = property.read_from(msg, offset, resolver)?;
            if outcome.changed {
                report.changed.push(entry.name.clone());
            }
            report.dropped_references.extend(
                outcome
                    .dropped_references
                    .into_iter()
                    .map(|global_id| (entry.name.clone(), global_id)),
            );
        }
        Ok(report)
    }

    /// Pushes pending changes to the backing object through the session.
    ///
    /// Sub-proxies go first. The first call sends the full state, later
    /// calls only the modified properties.
    pub fn update_vtk_objects(&mut self, session: &mut Session) -> SyncResult<()> {
        if self.remote.is_prototype() {
            return Ok(());
        }
        for sub in self.sub_proxies.values() {
            sub.borrow_mut().update_vtk_objects(session)?;
        }

        let msg = if self.materialized {
            self.delta_state()?
        } else {
            self.full_state()?
        };
        if self.materialized && msg.properties.is_empty() {
            return Ok(());
        }

        session.push_state(&msg)?;
        self.materialized = true;
        self.mark_all_clean();
        Ok(())
    }

    /// Refreshes information-only properties from the server.
    pub fn update_property_information(&mut self, session: &mut Session) -> SyncResult<()> {
        if self.remote.is_prototype() {
            return Ok(());
        }
        let global_id = self.remote.require_global_id()?;
        let mut request = Message::new(global_id, self.remote.location());
        for property in self.properties.values() {
            if property.is_information_only() {
                request.push_property(property.name(), Variant::empty(property.kind()));
            }
        }
        if request.properties.is_empty() {
            return Ok(());
        }

        let Some(reply) = session.pull_state(&request)? else {
            return Ok(());
        };
        for (offset, entry) in reply.properties.iter().enumerate() {
            if let Some(property) = self.properties.get_mut(&entry.name) {
                if property.is_information_only() {
                    property.read_from(&reply, offset, &mut KeepReferences)?;
                    property.set_modified(false);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Proxy;
    use crate::error::SyncError;
    use crate::model::message::{Location, Message, Variant, VariantKind};
    use crate::proxy::property::{KeepReferences, Property, PropertyValues, ProxySlot};

    fn sphere() -> Proxy {
        let mut proxy = Proxy::new("sources", "SphereSource");
        proxy.add_property(
            Property::new("Radius", PropertyValues::empty(VariantKind::Float64))
                .with_command("SetRadius"),
        );
        proxy.add_property(
            Property::new("Input", PropertyValues::empty(VariantKind::Proxy))
                .with_command("SetInput")
                .with_repeatable(true),
        );
        proxy.add_property(
            Property::new("Bounds", PropertyValues::empty(VariantKind::Float64))
                .with_command("GetBounds")
                .with_information_only(true),
        );
        proxy
    }

    #[test]
    fn states_require_an_identity() {
        let proxy = sphere();
        assert!(matches!(proxy.full_state(), Err(SyncError::NotRegistered(0))));
    }

    #[test]
    fn delta_holds_only_modified_synchronized_properties() {
        let mut proxy = sphere();
        proxy.remote().assign_global_id(11).unwrap();
        proxy
            .require_property_mut("Radius")
            .unwrap()
            .set_elements(&[2.0])
            .unwrap();
        proxy
            .require_property_mut("Bounds")
            .unwrap()
            .set_elements(&[0.0, 1.0])
            .unwrap();

        let delta = proxy.delta_state().unwrap();
        assert_eq!(delta.property_names().collect::<Vec<_>>(), vec!["Radius"]);
        assert!(proxy.is_dirty());

        proxy.mark_all_clean();
        assert!(!proxy.is_dirty());
        assert!(proxy.delta_state().unwrap().properties.is_empty());
    }

    #[test]
    fn full_state_carries_identity_extensions() {
        let mut proxy = sphere().with_location(Location::SERVERS);
        proxy.remote().assign_global_id(11).unwrap();
        let transform = Proxy::new("extended_sources", "Transform2")
            .with_sub_proxy_name(Some("Transform".to_string()))
            .into_handle();
        transform.borrow().remote().assign_global_id(12).unwrap();
        proxy.add_sub_proxy("Transform", transform);

        let state = proxy.full_state().unwrap();
        assert_eq!(state.location, Location::SERVERS);
        assert_eq!(state.extensions.xml_name.as_deref(), Some("SphereSource"));
        assert_eq!(state.extensions.sub_proxies.len(), 1);
        assert_eq!(state.extensions.sub_proxies[0].global_id, 12);
        assert_eq!(state.properties.len(), 3);
    }

    #[test]
    fn load_state_reports_changes_and_unknown_names() {
        let mut proxy = sphere();
        let mut msg = Message::new(11, Location::DATA_SERVER);
        msg.push_property("Radius", Variant::Float64(vec![3.0]));
        msg.push_property("Opacity", Variant::Float64(vec![0.5]));
        msg.push_property(
            "Input",
            Variant::Proxy {
                global_ids: vec![13],
                ports: vec![1],
            },
        );

        let report = proxy.load_state(&msg, &mut KeepReferences).unwrap();
        assert_eq!(report.changed, vec!["Radius".to_string(), "Input".to_string()]);
        assert_eq!(report.unknown_properties, vec!["Opacity".to_string()]);
        assert_eq!(
            proxy.producers(),
            vec![("Input".to_string(), ProxySlot::new(13, 1))]
        );
        assert!(proxy.is_dirty());
    }
}
