//! Interest sets: which resources (and keys) templates actually read
//!
//! Entries are append-only. Once a name or key has been learned it stays
//! of interest for the life of the process.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::kinds::ResourceKind;

/// One learned dependency of a template
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub namespace: String,
    pub kind: ResourceKind,
    pub name: String,
    /// Keys read from the resource (ConfigMap and Secret only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

/// Resource name -> keys of interest
///
/// Name-only kinds (Service, Endpoints) store an empty key set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InterestSet {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl InterestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource name. Returns `true` if it was not yet known.
    pub fn insert_name(&mut self, name: &str) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(name.to_string(), BTreeSet::new());
        true
    }

    /// Register a key of a resource. Returns `true` if the pair was not yet known.
    pub fn insert_key(&mut self, name: &str, key: &str) -> bool {
        self.entries
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string())
    }

    /// Check whether events for this resource name should be considered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Keys of interest for a resource, if the resource is of interest
    pub fn keys(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(name)
    }

    /// Iterate over (name, keys) in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
