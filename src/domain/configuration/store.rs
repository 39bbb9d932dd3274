//! Station configuration table
//!
//! OCPP 1.6J addresses configuration by flat key, OCPP 2.0.1 by
//! (component, variable). Both are served by the same store, keyed
//! differently.

use std::collections::BTreeMap;
use std::fmt;

/// Whether the CSMS may change a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    ReadOnly,
    ReadWrite,
}

/// Value domain, checked on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Boolean,
    Text,
}

impl ValueKind {
    fn accepts(&self, value: &str) -> bool {
        match self {
            Self::Integer => value.trim().parse::<u64>().is_ok(),
            Self::Boolean => matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "false"),
            Self::Text => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub value: String,
    pub mutability: Mutability,
    pub kind: ValueKind,
}

impl ConfigEntry {
    pub fn is_read_only(&self) -> bool {
        self.mutability == Mutability::ReadOnly
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.value.trim().parse().ok()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

/// Result of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Accepted,
    /// Read-only key or a value outside the key's domain
    Rejected,
    Unknown,
}

/// OCPP 2.0.1 (component, variable) address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableKey {
    pub component: String,
    pub variable: String,
}

impl VariableKey {
    pub fn new(component: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            variable: variable.into(),
        }
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.variable)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore<K> {
    entries: BTreeMap<K, ConfigEntry>,
}

impl<K: Ord + Clone> Default for ConfigStore<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> ConfigStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: K,
        value: impl Into<String>,
        mutability: Mutability,
        kind: ValueKind,
    ) -> &mut Self {
        self.entries.insert(
            key,
            ConfigEntry {
                value: value.into(),
                mutability,
                kind,
            },
        );
        self
    }

    pub fn get(&self, key: &K) -> Option<&ConfigEntry> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: &K, value: &str) -> SetOutcome {
        match self.entries.get_mut(key) {
            None => SetOutcome::Unknown,
            Some(entry) if entry.is_read_only() || !entry.kind.accepts(value) => {
                SetOutcome::Rejected
            }
            Some(entry) => {
                entry.value = value.trim().to_string();
                SetOutcome::Accepted
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &ConfigEntry)> {
        self.entries.iter()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ConfigStore<VariableKey> {
    /// Whether any variable of `component` exists.
    pub fn has_component(&self, component: &str) -> bool {
        self.entries.keys().any(|k| k.component == component)
    }
}
