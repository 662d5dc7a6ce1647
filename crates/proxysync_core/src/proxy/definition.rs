//! Declarative proxy definitions and the default proxy factory.
//!
//! # Responsibility
//! - Describe proxy types (properties, commands, defaults, sub-proxies).
//! - Validate definitions before they are registered.
//! - Build fresh, unregistered `Proxy` instances on request.
//!
//! # Invariants
//! - Group, type, and property identifiers match `IDENTIFIER_RE`.
//! - `(group, name)` pairs are unique inside one registry.
//! - Declared defaults carry the declared property kind.

use crate::model::message::{Location, Variant, VariantKind};
use crate::proxy::property::{Property, PropertyValues};
use crate::proxy::Proxy;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("valid identifier regex")
});

const MAX_SUB_PROXY_DEPTH: usize = 8;

/// Factory collaborator producing fresh proxies by type.
pub trait ProxyFactory {
    /// Returns a new unregistered proxy, or `None` for unknown types.
    fn new_proxy(&self, xml_group: &str, xml_name: &str, sub_proxy_name: Option<&str>)
        -> Option<Proxy>;
}

fn default_location() -> Location {
    Location::DATA_SERVER
}

/// One declared property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub kind: VariantKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub information_only: bool,
    #[serde(default)]
    pub repeatable: bool,
    #[serde(default)]
    pub default: Option<Variant>,
}

/// Named sub-proxy slot and the type filling it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubProxyDefinition {
    pub name: String,
    pub group: String,
    pub proxy: String,
}

/// Declaration of one proxy type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyDefinition {
    pub group: String,
    pub name: String,
    #[serde(default = "default_location")]
    pub location: Location,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    #[serde(default)]
    pub sub_proxies: Vec<SubProxyDefinition>,
}

impl ProxyDefinition {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            location: default_location(),
            properties: Vec::new(),
            sub_proxies: Vec::new(),
        }
    }

    /// Appends a regular property with a setter command.
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        kind: VariantKind,
        command: impl Into<String>,
    ) -> Self {
        self.properties.push(PropertyDefinition {
            name: name.into(),
            kind,
            command: Some(command.into()),
            information_only: false,
            repeatable: false,
            default: None,
        });
        self
    }

    pub fn with_property_definition(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_sub_proxy(
        mut self,
        name: impl Into<String>,
        group: impl Into<String>,
        proxy: impl Into<String>,
    ) -> Self {
        self.sub_proxies.push(SubProxyDefinition {
            name: name.into(),
            group: group.into(),
            proxy: proxy.into(),
        });
        self
    }

    /// Validates identifiers, uniqueness, and default kinds.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        require_identifier(&self.group)?;
        require_identifier(&self.name)?;

        let mut names = BTreeSet::new();
        for property in &self.properties {
            require_identifier(&property.name)?;
            if !names.insert(property.name.as_str()) {
                return Err(DefinitionError::DuplicateProperty {
                    proxy: self.name.clone(),
                    property: property.name.clone(),
                });
            }
            if let Some(default) = &property.default {
                if default.kind() != property.kind {
                    return Err(DefinitionError::DefaultKindMismatch {
                        property: property.name.clone(),
                        expected: property.kind,
                        found: default.kind(),
                    });
                }
            }
        }

        let mut sub_names = BTreeSet::new();
        for sub in &self.sub_proxies {
            require_identifier(&sub.name)?;
            require_identifier(&sub.group)?;
            require_identifier(&sub.proxy)?;
            if !sub_names.insert(sub.name.as_str()) {
                return Err(DefinitionError::DuplicateSubProxy {
                    proxy: self.name.clone(),
                    sub_proxy: sub.name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn require_identifier(value: &str) -> Result<(), DefinitionError> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(DefinitionError::InvalidIdentifier(value.to_string()))
    }
}

/// Definition registration and loading errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    InvalidIdentifier(String),
    DuplicateDefinition { group: String, name: String },
    DuplicateProperty { proxy: String, property: String },
    DuplicateSubProxy { proxy: String, sub_proxy: String },
    DefaultKindMismatch {
        property: String,
        expected: VariantKind,
        found: VariantKind,
    },
    Parse(String),
}

impl Display for DefinitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier(value) => write!(f, "identifier is invalid: {value:?}"),
            Self::DuplicateDefinition { group, name } => {
                write!(f, "proxy definition already registered: {group}/{name}")
            }
            Self::DuplicateProperty { proxy, property } => {
                write!(f, "property `{property}` declared twice on {proxy}")
            }
            Self::DuplicateSubProxy { proxy, sub_proxy } => {
                write!(f, "sub-proxy `{sub_proxy}` declared twice on {proxy}")
            }
            Self::DefaultKindMismatch {
                property,
                expected,
                found,
            } => write!(
                f,
                "default for `{property}` is {found}, declared kind is {expected}"
            ),
            Self::Parse(message) => write!(f, "definition json is invalid: {message}"),
        }
    }
}

impl Error for DefinitionError {}

/// In-memory registry of proxy definitions keyed by `(group, name)`.
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    definitions: BTreeMap<(String, String), ProxyDefinition>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON array of definitions and registers each of them.
    pub fn from_json_str(json: &str) -> Result<Self, DefinitionError> {
        let definitions: Vec<ProxyDefinition> =
            serde_json::from_str(json).map_err(|err| DefinitionError::Parse(err.to_string()))?;
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, definition: ProxyDefinition) -> Result<(), DefinitionError> {
        definition.validate()?;
        let key = (definition.group.clone(), definition.name.clone());
        if self.definitions.contains_key(&key) {
            return Err(DefinitionError::DuplicateDefinition {
                group: key.0,
                name: key.1,
            });
        }
        self.definitions.insert(key, definition);
        Ok(())
    }

    pub fn get(&self, group: &str, name: &str) -> Option<&ProxyDefinition> {
        self.definitions
            .get(&(group.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn build(
        &self,
        group: &str,
        name: &str,
        sub_proxy_name: Option<&str>,
        depth: usize,
    ) -> Option<Proxy> {
        if depth > MAX_SUB_PROXY_DEPTH {
            warn!("event=proxy_build module=definition status=error group={group} name={name} reason=sub_proxy_depth");
            return None;
        }
        let definition = self.get(group, name)?;

        let mut proxy = Proxy::new(group, name)
            .with_location(definition.location)
            .with_sub_proxy_name(sub_proxy_name.map(str::to_string));

        for declared in &definition.properties {
            let values = PropertyValues::with_default(declared.kind, declared.default.as_ref())?;
            let mut property = Property::new(declared.name.clone(), values)
                .with_information_only(declared.information_only)
                .with_repeatable(declared.repeatable);
            if let Some(command) = &declared.command {
                property = property.with_command(command.clone());
            }
            proxy.add_property(property);
        }

        for sub in &definition.sub_proxies {
            let Some(child) = self.build(&sub.group, &sub.proxy, Some(&sub.name), depth + 1) else {
                warn!(
                    "event=proxy_build module=definition status=error group={group} name={name} sub_proxy={}",
                    sub.name
                );
                return None;
            };
            proxy.add_sub_proxy(sub.name.clone(), child.into_handle());
        }
        Some(proxy)
    }
}

impl ProxyFactory for DefinitionRegistry {
    fn new_proxy(
        &self,
        xml_group: &str,
        xml_name: &str,
        sub_proxy_name: Option<&str>,
    ) -> Option<Proxy> {
        self.build(xml_group, xml_name, sub_proxy_name, 0)
    }
}
