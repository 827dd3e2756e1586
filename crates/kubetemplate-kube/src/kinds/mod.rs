//! Resource kinds understood by kubetemplate
//!
//! Four kinds are modelled, each with its own notion of what counts as a
//! material update:
//! - **ConfigMap**: only the keys a template reads, compared as text
//! - **Secret**: only the keys a template reads, compared as bytes
//! - **Service**: the whole `spec`, compared by serialized form
//! - **Endpoints**: an order-independent digest of ports and addresses

mod config_map;
mod endpoints;
mod secret;
mod service;

pub use endpoints::{endpoint_ips, subsets_digest};

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::control_plane::{ControlPlane, WatchStream};

/// A resource kind known to the monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    ConfigMap,
    Secret,
    Service,
    Endpoints,
}

impl ResourceKind {
    /// Every kind, in monitor start order
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::ConfigMap,
        ResourceKind::Endpoints,
        ResourceKind::Secret,
        ResourceKind::Service,
    ];

    /// Canonical Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Service => "Service",
            Self::Endpoints => "Endpoints",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive, singular or plural
impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "configmap" | "configmaps" => Ok(Self::ConfigMap),
            "secret" | "secrets" => Ok(Self::Secret),
            "service" | "services" => Ok(Self::Service),
            "endpoints" | "endpoint" => Ok(Self::Endpoints),
            _ => Err(format!("unhandled resource kind '{}'", s)),
        }
    }
}

/// A Kubernetes type that can be monitored for material changes
///
/// Implemented for the four k8s-openapi types backing [`ResourceKind`].
pub trait WatchedKind:
    kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + Serialize
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// The kind tag for this type
    const KIND: ResourceKind;

    /// Open a watch subscription for this kind in one namespace
    fn watch(control_plane: &dyn ControlPlane, namespace: &str) -> WatchStream<Self>;

    /// Decide whether an update from `old` to `new` matters to a template
    ///
    /// `keys` holds the keys of interest for keyed kinds and is empty otherwise.
    fn is_material_update(keys: &BTreeSet<String>, old: &Self, new: &Self) -> bool;
}

/// Compare one key of two optional maps: missing on either side counts as a change
pub(crate) fn keyed_value_changed<V, F>(
    old: Option<&std::collections::BTreeMap<String, V>>,
    new: Option<&std::collections::BTreeMap<String, V>>,
    key: &str,
    eq: F,
) -> bool
where
    F: Fn(&V, &V) -> bool,
{
    match (old.and_then(|m| m.get(key)), new.and_then(|m| m.get(key))) {
        (Some(a), Some(b)) => !eq(a, b),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("ConfigMap".parse::<ResourceKind>(), Ok(ResourceKind::ConfigMap));
        assert_eq!("secrets".parse::<ResourceKind>(), Ok(ResourceKind::Secret));
        assert_eq!("SERVICE".parse::<ResourceKind>(), Ok(ResourceKind::Service));
        assert_eq!("endpoints".parse::<ResourceKind>(), Ok(ResourceKind::Endpoints));
        assert!("deployment".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_kind_parse_error() {
        let err = "pod".parse::<ResourceKind>().unwrap_err();
        assert!(err.contains("pod"));
    }

    #[test]
    fn test_kind_display_roundtrips_through_registry() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.to_string().parse::<ResourceKind>(), Ok(kind));
        }
    }
}
