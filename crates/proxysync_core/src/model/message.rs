//! Wire/storage envelope for one remote object's state.
//!
//! # Responsibility
//! - Define `Message`, `Variant`, and `Location`, the shapes exchanged with
//!   the transport and persisted by the state locator and snapshot store.
//! - Provide merge helpers so partial updates fold into full states.
//!
//! # Invariants
//! - Property entries keep their order; merging replaces same-name entries in
//!   place and appends unseen names.
//! - Proxy variants keep `global_ids` and `ports` the same length; id `0` is a
//!   null slot and is never filtered out.

use crate::model::roster::Roster;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::ops::BitOr;

/// Process-unique identifier of a remote object.
///
/// `0` is reserved for "no object" and doubles as the null proxy reference.
pub type GlobalId = u32;

/// Ids below this value are reserved for session-level singletons.
pub const FIRST_DYNAMIC_ID: GlobalId = 10;
/// Reserved id of the session proxy manager.
pub const PROXY_MANAGER_ID: GlobalId = 1;
/// Reserved id of the collaboration manager.
pub const COLLABORATION_MANAGER_ID: GlobalId = 2;

/// Bitmask of process roles a message should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(u32);

impl Location {
    pub const NONE: Self = Self(0);
    pub const DATA_SERVER: Self = Self(0x01);
    pub const DATA_SERVER_ROOT: Self = Self(0x02);
    pub const RENDER_SERVER: Self = Self(0x04);
    pub const RENDER_SERVER_ROOT: Self = Self(0x08);
    pub const CLIENT: Self = Self(0x10);
    pub const SERVERS: Self = Self(0x01 | 0x04);
    pub const ALL: Self = Self(0x1f);

    const SERVER_MASK: u32 = 0x0f;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns whether every role in `other` is selected.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns whether at least one server role is selected.
    pub const fn targets_server(self) -> bool {
        self.0 & Self::SERVER_MASK != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Location {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Discriminant of a `Variant`, also used to declare property kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Int,
    Float64,
    IdType,
    String,
    Proxy,
}

impl VariantKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float64 => "float64",
            Self::IdType => "id_type",
            Self::String => "string",
            Self::Proxy => "proxy",
        }
    }
}

impl Display for VariantKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged repeated value carried by one message property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Variant {
    Int(Vec<i32>),
    Float64(Vec<f64>),
    IdType(Vec<i64>),
    String(Vec<String>),
    /// Parallel arrays: referenced object id and its output port.
    Proxy {
        global_ids: Vec<GlobalId>,
        ports: Vec<u32>,
    },
}

impl Variant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Self::Int(_) => VariantKind::Int,
            Self::Float64(_) => VariantKind::Float64,
            Self::IdType(_) => VariantKind::IdType,
            Self::String(_) => VariantKind::String,
            Self::Proxy { .. } => VariantKind::Proxy,
        }
    }

    /// Empty payload of the given kind, used for pull requests.
    pub fn empty(kind: VariantKind) -> Self {
        match kind {
            VariantKind::Int => Self::Int(Vec::new()),
            VariantKind::Float64 => Self::Float64(Vec::new()),
            VariantKind::IdType => Self::IdType(Vec::new()),
            VariantKind::String => Self::String(Vec::new()),
            VariantKind::Proxy => Self::Proxy {
                global_ids: Vec::new(),
                ports: Vec::new(),
            },
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int(values) => values.len(),
            Self::Float64(values) => values.len(),
            Self::IdType(values) => values.len(),
            Self::String(values) => values.len(),
            Self::Proxy { global_ids, .. } => global_ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-null object ids referenced by a proxy variant.
    pub fn referenced_ids(&self) -> impl Iterator<Item = GlobalId> + '_ {
        let ids: &[GlobalId] = match self {
            Self::Proxy { global_ids, .. } => global_ids,
            _ => &[],
        };
        ids.iter().copied().filter(|id| *id != 0)
    }
}

/// One named value inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyEntry {
    pub name: String,
    pub value: Variant,
}

/// Sub-proxy identity recorded alongside its parent's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubProxyEntry {
    pub name: String,
    pub global_id: GlobalId,
}

/// Optional envelope fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_sub_proxy_name: Option<String>,
    /// Sender of a collaboration message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u32>,
    /// Shared with other clients only; never persisted as object state.
    #[serde(default)]
    pub share_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roster: Option<Roster>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_proxies: Vec<SubProxyEntry>,
}

/// State envelope for one remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub global_id: GlobalId,
    pub location: Location,
    #[serde(default)]
    pub properties: Vec<PropertyEntry>,
    #[serde(default)]
    pub extensions: MessageExtensions,
}

impl Message {
    pub fn new(global_id: GlobalId, location: Location) -> Self {
        Self {
            global_id,
            location,
            properties: Vec::new(),
            extensions: MessageExtensions::default(),
        }
    }

    /// Appends one named value, keeping existing entries untouched.
    pub fn push_property(&mut self, name: impl Into<String>, value: Variant) {
        self.properties.push(PropertyEntry {
            name: name.into(),
            value,
        });
    }

    /// Returns the first value stored under `name`.
    pub fn property(&self, name: &str) -> Option<&Variant> {
        self.properties
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.value)
    }

    pub fn property_at(&self, offset: usize) -> Option<&PropertyEntry> {
        self.properties.get(offset)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|entry| entry.name.as_str())
    }

    /// Returns whether this message carries a collaboration roster.
    pub fn is_roster(&self) -> bool {
        self.extensions.roster.is_some()
    }

    /// Folds a partial update into this full state.
    ///
    /// Same-name entries are replaced in place, new names are appended, and
    /// identity extensions are filled in when the delta carries them.
    pub fn merge_from(&mut self, delta: &Message) {
        for entry in &delta.properties {
            match self
                .properties
                .iter_mut()
                .find(|existing| existing.name == entry.name)
            {
                Some(existing) => existing.value = entry.value.clone(),
                None => self.properties.push(entry.clone()),
            }
        }

        self.location = self.location | delta.location;
        let ext = &delta.extensions;
        if ext.xml_group.is_some() {
            self.extensions.xml_group = ext.xml_group.clone();
        }
        if ext.xml_name.is_some() {
            self.extensions.xml_name = ext.xml_name.clone();
        }
        if ext.xml_sub_proxy_name.is_some() {
            self.extensions.xml_sub_proxy_name = ext.xml_sub_proxy_name.clone();
        }
        if ext.client_id.is_some() {
            self.extensions.client_id = ext.client_id;
        }
        if !ext.sub_proxies.is_empty() {
            self.extensions.sub_proxies = ext.sub_proxies.clone();
        }
    }

    /// Non-null ids referenced by proxy properties and sub-proxy entries.
    pub fn referenced_ids(&self) -> BTreeSet<GlobalId> {
        let mut ids: BTreeSet<GlobalId> = self
            .properties
            .iter()
            .flat_map(|entry| entry.value.referenced_ids())
            .collect();
        ids.extend(
            self.extensions
                .sub_proxies
                .iter()
                .map(|entry| entry.global_id)
                .filter(|id| *id != 0),
        );
        ids.remove(&self.global_id);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::{Location, Message, SubProxyEntry, Variant};

    fn radius_message(id: u32, radius: f64) -> Message {
        let mut msg = Message::new(id, Location::DATA_SERVER);
        msg.push_property("Radius", Variant::Float64(vec![radius]));
        msg
    }

    #[test]
    fn location_server_targeting() {
        assert!(Location::DATA_SERVER.targets_server());
        assert!((Location::CLIENT | Location::RENDER_SERVER_ROOT).targets_server());
        assert!(!Location::CLIENT.targets_server());
        assert!(Location::SERVERS.contains(Location::RENDER_SERVER));
        assert!(!Location::SERVERS.contains(Location::CLIENT));
        assert_eq!(Location::from_bits(0xff), Location::ALL);
    }

    #[test]
    fn merge_replaces_in_place_and_appends_new_names() {
        let mut full = radius_message(42, 1.0);
        full.push_property("Center", Variant::Float64(vec![0.0, 0.0, 0.0]));

        let mut delta = radius_message(42, 2.5);
        delta.push_property("ThetaResolution", Variant::Int(vec![16]));
        full.merge_from(&delta);

        let names: Vec<&str> = full.property_names().collect();
        assert_eq!(names, vec!["Radius", "Center", "ThetaResolution"]);
        assert_eq!(full.property("Radius"), Some(&Variant::Float64(vec![2.5])));
    }

    #[test]
    fn merge_keeps_identity_extensions_when_delta_lacks_them() {
        let mut full = radius_message(7, 1.0);
        full.extensions.xml_group = Some("sources".to_string());
        full.merge_from(&radius_message(7, 3.0));
        assert_eq!(full.extensions.xml_group.as_deref(), Some("sources"));
    }

    #[test]
    fn referenced_ids_skip_null_slots_and_self() {
        let mut msg = Message::new(5, Location::DATA_SERVER);
        msg.push_property(
            "Input",
            Variant::Proxy {
                global_ids: vec![0, 11, 5],
                ports: vec![0, 1, 0],
            },
        );
        msg.extensions.sub_proxies.push(SubProxyEntry {
            name: "Transform".to_string(),
            global_id: 12,
        });
        let ids: Vec<u32> = msg.referenced_ids().into_iter().collect();
        assert_eq!(ids, vec![11, 12]);
    }

    #[test]
    fn variant_serializes_with_type_tag() {
        let json = serde_json::to_string(&Variant::Int(vec![1, 2])).unwrap();
        assert_eq!(json, r#"{"type":"int","payload":[1,2]}"#);
        let proxy: Variant =
            serde_json::from_str(r#"{"type":"proxy","payload":{"global_ids":[0,3],"ports":[0,1]}}"#)
                .unwrap();
        assert_eq!(proxy.len(), 2);
        assert_eq!(proxy.referenced_ids().collect::<Vec<_>>(), vec![3]);
    }
}
