//! Typed property slots and their synchronization codecs.
//!
//! # Responsibility
//! - Store checked and staged ("unchecked") values for one named property.
//! - Encode/decode values to message variants and apply them to backing
//!   objects through the property command.
//!
//! # Invariants
//! - Unchecked mutators never touch checked values.
//! - Every checked mutator clears the unchecked stage as its final step.
//! - Proxy slots with id `0` are kept as explicit nulls; unresolvable ids are
//!   dropped on load and reported in `ReadOutcome`.

use crate::error::{SyncError, SyncResult};
use crate::model::message::{GlobalId, Message, Variant, VariantKind};
use crate::session::transport::BackingObject;
use std::fmt::Debug;

/// Resolves referenced object ids while a message is loaded.
pub trait ReferenceResolver {
    /// Returns whether `global_id` names a live (or creatable) object.
    fn resolve_reference(&mut self, global_id: GlobalId) -> bool;
}

/// Resolver that accepts every id, used when no locator is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepReferences;

impl ReferenceResolver for KeepReferences {
    fn resolve_reference(&mut self, _global_id: GlobalId) -> bool {
        true
    }
}

/// Change notifications queued on a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyEvent {
    Modified,
    UncheckedModified,
}

/// Result of decoding one message entry into a property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    pub changed: bool,
    pub dropped_references: Vec<GlobalId>,
}

/// Checked values plus an optional staged copy.
///
/// `unchecked == None` means the stage mirrors the checked values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorValues<T> {
    checked: Vec<T>,
    unchecked: Option<Vec<T>>,
    defaults: Vec<T>,
}

impl<T: Clone + PartialEq + Default> VectorValues<T> {
    pub fn new(defaults: Vec<T>) -> Self {
        Self {
            checked: defaults.clone(),
            unchecked: None,
            defaults,
        }
    }

    pub fn elements(&self) -> &[T] {
        &self.checked
    }

    pub fn unchecked_elements(&self) -> &[T] {
        self.unchecked.as_deref().unwrap_or(&self.checked)
    }

    pub fn defaults(&self) -> &[T] {
        &self.defaults
    }

    pub fn has_unchecked(&self) -> bool {
        self.unchecked.is_some()
    }

    fn set_elements(&mut self, values: &[T]) -> bool {
        let changed = self.checked.as_slice() != values;
        if changed {
            self.checked = values.to_vec();
        }
        self.unchecked = None;
        changed
    }

    fn set_element(&mut self, index: usize, value: T) -> bool {
        let changed = match self.checked.get(index) {
            Some(current) => *current != value,
            None => true,
        };
        if changed {
            if index >= self.checked.len() {
                self.checked.resize(index + 1, T::default());
            }
            self.checked[index] = value;
        }
        self.unchecked = None;
        changed
    }

    fn set_unchecked_elements(&mut self, values: &[T]) {
        self.unchecked = Some(values.to_vec());
    }

    fn set_unchecked_element(&mut self, index: usize, value: T) {
        let staged = self
            .unchecked
            .get_or_insert_with(|| self.checked.clone());
        if index >= staged.len() {
            staged.resize(index + 1, T::default());
        }
        staged[index] = value;
    }

    fn append_unchecked(&mut self, value: T) {
        self.unchecked
            .get_or_insert_with(|| self.checked.clone())
            .push(value);
    }

    fn clear_unchecked(&mut self) {
        self.unchecked = None;
    }

    fn reset_to_default(&mut self) -> bool {
        let defaults = self.defaults.clone();
        self.set_elements(&defaults)
    }
}

/// Scalar element types carried by vector properties.
pub trait ElementType: Clone + PartialEq + Default + Debug {
    const KIND: VariantKind;

    fn values(values: &PropertyValues) -> Option<&VectorValues<Self>>;
    fn values_mut(values: &mut PropertyValues) -> Option<&mut VectorValues<Self>>;
    fn to_variant(elements: &[Self]) -> Variant;
    fn from_variant(variant: &Variant) -> Option<&[Self]>;
}

macro_rules! element_type {
    ($ty:ty, $kind:ident) => {
        impl ElementType for $ty {
            const KIND: VariantKind = VariantKind::$kind;

            fn values(values: &PropertyValues) -> Option<&VectorValues<Self>> {
                match values {
                    PropertyValues::$kind(values) => Some(values),
                    _ => None,
                }
            }

            fn values_mut(values: &mut PropertyValues) -> Option<&mut VectorValues<Self>> {
                match values {
                    PropertyValues::$kind(values) => Some(values),
                    _ => None,
                }
            }

            fn to_variant(elements: &[Self]) -> Variant {
                Variant::$kind(elements.to_vec())
            }

            fn from_variant(variant: &Variant) -> Option<&[Self]> {
                match variant {
                    Variant::$kind(values) => Some(values),
                    _ => None,
                }
            }
        }
    };
}

element_type!(i32, Int);
element_type!(f64, Float64);
element_type!(i64, IdType);
element_type!(String, String);

/// One proxy reference: target object and its output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProxySlot {
    pub global_id: GlobalId,
    pub port: u32,
}

impl ProxySlot {
    pub const NULL: Self = Self {
        global_id: 0,
        port: 0,
    };

    pub fn new(global_id: GlobalId, port: u32) -> Self {
        Self { global_id, port }
    }

    pub fn is_null(&self) -> bool {
        self.global_id == 0
    }
}

/// Values of a proxy-valued property.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProxyValues {
    slots: VectorValues<ProxySlot>,
}

impl ProxyValues {
    pub fn new(defaults: Vec<ProxySlot>) -> Self {
        Self {
            slots: VectorValues::new(defaults),
        }
    }

    pub fn slots(&self) -> &[ProxySlot] {
        self.slots.elements()
    }

    pub fn unchecked_slots(&self) -> &[ProxySlot] {
        self.slots.unchecked_elements()
    }
}

/// Per-kind capability interface used by the push/pull protocol.
pub trait SyncProperty {
    fn kind(&self) -> VariantKind;

    /// Encodes the checked value.
    fn to_variant(&self) -> Variant;

    /// Decodes `value` into the checked value.
    ///
    /// Returns `None` when the payload kind does not match.
    fn read_from(
        &mut self,
        value: &Variant,
        resolver: &mut dyn ReferenceResolver,
    ) -> Option<ReadOutcome>;

    /// Appends the checked value to `msg` under `name`.
    fn write_to(&self, name: &str, msg: &mut Message) {
        msg.push_property(name, self.to_variant());
    }

    /// Applies the checked value to the backing object.
    fn push(&self, command: &str, backing: &mut dyn BackingObject) -> SyncResult<()> {
        backing.invoke(command, &self.to_variant())
    }

    /// Reads the backing object's current value, discarding wrong kinds.
    fn pull(&self, command: &str, backing: &dyn BackingObject) -> Option<Variant> {
        backing
            .query(command)
            .filter(|value| value.kind() == self.kind())
    }
}

impl<T: ElementType> SyncProperty for VectorValues<T> {
    fn kind(&self) -> VariantKind {
        T::KIND
    }

    fn to_variant(&self) -> Variant {
        T::to_variant(&self.checked)
    }

    fn read_from(
        &mut self,
        value: &Variant,
        _resolver: &mut dyn ReferenceResolver,
    ) -> Option<ReadOutcome> {
        let values = T::from_variant(value)?;
        Some(ReadOutcome {
            changed: self.set_elements(values),
            dropped_references: Vec::new(),
        })
    }
}

impl SyncProperty for ProxyValues {
    fn kind(&self) -> VariantKind {
        VariantKind::Proxy
    }

    fn to_variant(&self) -> Variant {
        let slots = self.slots.elements();
        Variant::Proxy {
            global_ids: slots.iter().map(|slot| slot.global_id).collect(),
            ports: slots.iter().map(|slot| slot.port).collect(),
        }
    }

    fn read_from(
        &mut self,
        value: &Variant,
        resolver: &mut dyn ReferenceResolver,
    ) -> Option<ReadOutcome> {
        let Variant::Proxy { global_ids, ports } = value else {
            return None;
        };

        let mut kept = Vec::with_capacity(global_ids.len());
        let mut dropped = Vec::new();
        for (index, global_id) in global_ids.iter().copied().enumerate() {
            let port = ports.get(index).copied().unwrap_or(0);
            if global_id == 0 || resolver.resolve_reference(global_id) {
                kept.push(ProxySlot::new(global_id, port));
            } else {
                dropped.push(global_id);
            }
        }

        Some(ReadOutcome {
            changed: self.slots.set_elements(&kept),
            dropped_references: dropped,
        })
    }
}

/// Closed set of property value kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValues {
    Int(VectorValues<i32>),
    Float64(VectorValues<f64>),
    IdType(VectorValues<i64>),
    String(VectorValues<String>),
    Proxy(ProxyValues),
}

impl PropertyValues {
    pub fn empty(kind: VariantKind) -> Self {
        match kind {
            VariantKind::Int => Self::Int(VectorValues::default()),
            VariantKind::Float64 => Self::Float64(VectorValues::default()),
            VariantKind::IdType => Self::IdType(VectorValues::default()),
            VariantKind::String => Self::String(VectorValues::default()),
            VariantKind::Proxy => Self::Proxy(ProxyValues::default()),
        }
    }

    /// Builds values of `kind` seeded with `default`.
    ///
    /// Returns `None` when `default` carries another kind.
    pub fn with_default(kind: VariantKind, default: Option<&Variant>) -> Option<Self> {
        let Some(default) = default else {
            return Some(Self::empty(kind));
        };
        if default.kind() != kind {
            return None;
        }

        Some(match default {
            Variant::Int(values) => Self::Int(VectorValues::new(values.clone())),
            Variant::Float64(values) => Self::Float64(VectorValues::new(values.clone())),
            Variant::IdType(values) => Self::IdType(VectorValues::new(values.clone())),
            Variant::String(values) => Self::String(VectorValues::new(values.clone())),
            Variant::Proxy { global_ids, ports } => Self::Proxy(ProxyValues::new(
                global_ids
                    .iter()
                    .enumerate()
                    .map(|(index, id)| ProxySlot::new(*id, ports.get(index).copied().unwrap_or(0)))
                    .collect(),
            )),
        })
    }

    pub fn kind(&self) -> VariantKind {
        self.codec().kind()
    }

    fn codec(&self) -> &dyn SyncProperty {
        match self {
            Self::Int(values) => values,
            Self::Float64(values) => values,
            Self::IdType(values) => values,
            Self::String(values) => values,
            Self::Proxy(values) => values,
        }
    }

    fn codec_mut(&mut self) -> &mut dyn SyncProperty {
        match self {
            Self::Int(values) => values,
            Self::Float64(values) => values,
            Self::IdType(values) => values,
            Self::String(values) => values,
            Self::Proxy(values) => values,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Int(values) => values.elements().len(),
            Self::Float64(values) => values.elements().len(),
            Self::IdType(values) => values.elements().len(),
            Self::String(values) => values.elements().len(),
            Self::Proxy(values) => values.slots().len(),
        }
    }

    fn clear_unchecked(&mut self) {
        match self {
            Self::Int(values) => values.clear_unchecked(),
            Self::Float64(values) => values.clear_unchecked(),
            Self::IdType(values) => values.clear_unchecked(),
            Self::String(values) => values.clear_unchecked(),
            Self::Proxy(values) => values.slots.clear_unchecked(),
        }
    }

    fn reset_to_default(&mut self) -> bool {
        match self {
            Self::Int(values) => values.reset_to_default(),
            Self::Float64(values) => values.reset_to_default(),
            Self::IdType(values) => values.reset_to_default(),
            Self::String(values) => values.reset_to_default(),
            Self::Proxy(values) => values.slots.reset_to_default(),
        }
    }
}

/// Named, typed value slot of a proxy.
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    command: Option<String>,
    information_only: bool,
    repeatable: bool,
    values: PropertyValues,
    last_pulled: Option<Variant>,
    modified: bool,
    events: Vec<PropertyEvent>,
}

impl Property {
    pub fn new(name: impl Into<String>, values: PropertyValues) -> Self {
        Self {
            name: name.into(),
            command: None,
            information_only: false,
            repeatable: false,
            values,
            last_pulled: None,
            modified: false,
            events: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_information_only(mut self, information_only: bool) -> Self {
        self.information_only = information_only;
        self
    }

    pub fn with_repeatable(mut self, repeatable: bool) -> Self {
        self.repeatable = repeatable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn is_information_only(&self) -> bool {
        self.information_only
    }

    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    pub fn kind(&self) -> VariantKind {
        self.values.kind()
    }

    pub fn values(&self) -> &PropertyValues {
        &self.values
    }

    pub fn number_of_elements(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the checked value changed since the last push.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Last value fetched from a backing object, kept for offline replay.
    pub fn last_pulled(&self) -> Option<&Variant> {
        self.last_pulled.as_ref()
    }

    /// Drains queued change notifications.
    pub fn take_events(&mut self) -> Vec<PropertyEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn elements<T: ElementType>(&self) -> SyncResult<&[T]> {
        Ok(self.vector::<T>()?.elements())
    }

    pub fn element<T: ElementType>(&self, index: usize) -> SyncResult<T> {
        let elements = self.elements::<T>()?;
        elements
            .get(index)
            .cloned()
            .ok_or_else(|| SyncError::IndexOutOfRange {
                property: self.name.clone(),
                index,
                len: elements.len(),
            })
    }

    /// Replaces the checked values and clears the unchecked stage.
    pub fn set_elements<T: ElementType>(&mut self, values: &[T]) -> SyncResult<()> {
        let changed = self.vector_mut::<T>()?.set_elements(values);
        self.after_checked_set(changed);
        Ok(())
    }

    /// Sets one checked element, growing the vector when needed.
    pub fn set_element<T: ElementType>(&mut self, index: usize, value: T) -> SyncResult<()> {
        let changed = self.vector_mut::<T>()?.set_element(index, value);
        self.after_checked_set(changed);
        Ok(())
    }

    pub fn reset_to_default(&mut self) {
        let changed = self.values.reset_to_default();
        self.after_checked_set(changed);
    }

    pub fn unchecked_elements<T: ElementType>(&self) -> SyncResult<&[T]> {
        Ok(self.vector::<T>()?.unchecked_elements())
    }

    pub fn set_unchecked_elements<T: ElementType>(&mut self, values: &[T]) -> SyncResult<()> {
        self.vector_mut::<T>()?.set_unchecked_elements(values);
        self.events.push(PropertyEvent::UncheckedModified);
        Ok(())
    }

    pub fn set_unchecked_element<T: ElementType>(
        &mut self,
        index: usize,
        value: T,
    ) -> SyncResult<()> {
        self.vector_mut::<T>()?.set_unchecked_element(index, value);
        self.events.push(PropertyEvent::UncheckedModified);
        Ok(())
    }

    pub fn clear_unchecked(&mut self) {
        self.values.clear_unchecked();
    }

    pub fn proxies(&self) -> SyncResult<&[ProxySlot]> {
        Ok(self.proxy_values()?.slots())
    }

    pub fn unchecked_proxies(&self) -> SyncResult<&[ProxySlot]> {
        Ok(self.proxy_values()?.unchecked_slots())
    }

    pub fn set_proxies(&mut self, slots: &[ProxySlot]) -> SyncResult<()> {
        let changed = self.proxy_values_mut()?.slots.set_elements(slots);
        self.after_checked_set(changed);
        Ok(())
    }

    /// Appends one reference; non-repeatable properties hold at most one.
    pub fn add_proxy(&mut self, slot: ProxySlot) -> SyncResult<()> {
        let mut slots = self.proxies()?.to_vec();
        if self.repeatable {
            slots.push(slot);
        } else {
            slots = vec![slot];
        }
        self.set_proxies(&slots)
    }

    /// Removes every slot referencing `global_id`.
    pub fn remove_proxy(&mut self, global_id: GlobalId) -> SyncResult<bool> {
        let slots = self.proxies()?;
        let kept: Vec<ProxySlot> = slots
            .iter()
            .copied()
            .filter(|slot| slot.global_id != global_id)
            .collect();
        let removed = kept.len() != slots.len();
        self.set_proxies(&kept)?;
        Ok(removed)
    }

    pub fn add_unchecked_proxy(&mut self, slot: ProxySlot) -> SyncResult<()> {
        self.proxy_values_mut()?.slots.append_unchecked(slot);
        self.events.push(PropertyEvent::UncheckedModified);
        Ok(())
    }

    pub fn remove_all_unchecked_proxies(&mut self) -> SyncResult<()> {
        self.proxy_values_mut()?.slots.set_unchecked_elements(&[]);
        self.events.push(PropertyEvent::UncheckedModified);
        Ok(())
    }

    /// Serializes the checked value as a named entry of `msg`.
    pub fn write_to(&self, msg: &mut Message) {
        self.values.codec().write_to(&self.name, msg);
    }

    /// Loads the entry at `offset` of `msg` into the checked value.
    ///
    /// # Errors
    /// - `CorruptState` when the entry is missing, carries another name, or
    ///   carries another value kind.
    pub fn read_from(
        &mut self,
        msg: &Message,
        offset: usize,
        resolver: &mut dyn ReferenceResolver,
    ) -> SyncResult<ReadOutcome> {
        let entry = msg.property_at(offset).ok_or_else(|| {
            SyncError::corrupt(&self.name, format!("no entry at offset {offset}"))
        })?;
        if entry.name != self.name {
            return Err(SyncError::corrupt(
                &self.name,
                format!("entry `{}` found at offset {offset}", entry.name),
            ));
        }

        let expected = self.kind();
        let outcome = self
            .values
            .codec_mut()
            .read_from(&entry.value, resolver)
            .ok_or_else(|| {
                SyncError::corrupt(
                    &self.name,
                    format!("expected {expected} payload, found {}", entry.value.kind()),
                )
            })?;

        if self.information_only {
            self.last_pulled = Some(entry.value.clone());
        }
        self.after_checked_set(outcome.changed);
        Ok(outcome)
    }

    /// Applies the checked value to the backing object via the command.
    ///
    /// Information-only and command-less properties are skipped.
    pub fn push(&self, backing: &mut dyn BackingObject) -> SyncResult<()> {
        if self.information_only {
            return Ok(());
        }
        let Some(command) = self.command.as_deref() else {
            return Ok(());
        };
        self.values.codec().push(command, backing)
    }

    /// Writes the backing object's current value into `msg`.
    ///
    /// Without a reachable backing object the last pulled value is replayed;
    /// regular properties fall back to their checked value. Returns whether
    /// an entry was written.
    pub fn pull(&mut self, backing: Option<&dyn BackingObject>, msg: &mut Message) -> bool {
        let fetched = match (backing, self.command.as_deref()) {
            (Some(backing), Some(command)) => self.values.codec().pull(command, backing),
            _ => None,
        };

        let value = match fetched {
            Some(value) => {
                self.last_pulled = Some(value.clone());
                Some(value)
            }
            None => match &self.last_pulled {
                Some(cached) => Some(cached.clone()),
                None if !self.information_only => Some(self.values.codec().to_variant()),
                None => None,
            },
        };

        match value {
            Some(value) => {
                msg.push_property(self.name.clone(), value);
                true
            }
            None => false,
        }
    }

    fn after_checked_set(&mut self, changed: bool) {
        if changed {
            self.modified = true;
            self.events.push(PropertyEvent::Modified);
        }
        self.values.clear_unchecked();
    }

    fn vector<T: ElementType>(&self) -> SyncResult<&VectorValues<T>> {
        T::values(&self.values).ok_or_else(|| SyncError::KindMismatch {
            property: self.name.clone(),
            expected: T::KIND,
            found: self.values.kind(),
        })
    }

    fn vector_mut<T: ElementType>(&mut self) -> SyncResult<&mut VectorValues<T>> {
        let found = self.values.kind();
        T::values_mut(&mut self.values).ok_or_else(|| SyncError::KindMismatch {
            property: self.name.clone(),
            expected: T::KIND,
            found,
        })
    }

    fn proxy_values(&self) -> SyncResult<&ProxyValues> {
        match &self.values {
            PropertyValues::Proxy(values) => Ok(values),
            other => Err(SyncError::KindMismatch {
                property: self.name.clone(),
                expected: VariantKind::Proxy,
                found: other.kind(),
            }),
        }
    }

    fn proxy_values_mut(&mut self) -> SyncResult<&mut ProxyValues> {
        match &mut self.values {
            PropertyValues::Proxy(values) => Ok(values),
            other => Err(SyncError::KindMismatch {
                property: self.name.clone(),
                expected: VariantKind::Proxy,
                found: other.kind(),
            }),
        }
    }
}
