use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Endpoints;
use sha2::{Digest, Sha256};

use super::{ResourceKind, WatchedKind};
use crate::control_plane::{ControlPlane, WatchStream};

impl WatchedKind for Endpoints {
    const KIND: ResourceKind = ResourceKind::Endpoints;

    fn watch(control_plane: &dyn ControlPlane, namespace: &str) -> WatchStream<Self> {
        control_plane.watch_endpoints(namespace)
    }

    fn is_material_update(_keys: &BTreeSet<String>, old: &Self, new: &Self) -> bool {
        subsets_digest(old) != subsets_digest(new)
    }
}

/// SHA-256 over the sorted port (name, number) pairs and sorted addresses of all subsets
///
/// The control plane does not keep subsets or addresses in a stable order
/// between events, so both lists are sorted before hashing. Each entry is
/// NUL-terminated to keep concatenations unambiguous.
pub fn subsets_digest(endpoints: &Endpoints) -> [u8; 32] {
    let mut ports = Vec::new();
    let mut addrs = Vec::new();

    for subset in endpoints.subsets.iter().flatten() {
        for port in subset.ports.iter().flatten() {
            ports.push(format!("{}{}", port.name.as_deref().unwrap_or_default(), port.port));
        }
        for addr in subset.addresses.iter().flatten() {
            addrs.push(addr.ip.as_str());
        }
    }

    ports.sort_unstable();
    addrs.sort_unstable();

    let mut hasher = Sha256::new();
    for port in &ports {
        hasher.update(port.as_bytes());
        hasher.update([0u8]);
    }
    for addr in &addrs {
        hasher.update(addr.as_bytes());
        hasher.update([0u8]);
    }
    hasher.finalize().into()
}

/// Ready addresses across all subsets, in the order the control plane reported them
pub fn endpoint_ips(endpoints: &Endpoints) -> Vec<String> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .map(|addr| addr.ip.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset};
    use kube::api::ObjectMeta;

    fn subset(addrs: &[&str], ports: &[(&str, i32)]) -> EndpointSubset {
        EndpointSubset {
            addresses: Some(
                addrs
                    .iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(
                ports
                    .iter()
                    .map(|(name, port)| EndpointPort {
                        name: Some(name.to_string()),
                        port: *port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn endpoints(subsets: Vec<EndpointSubset>) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            subsets: Some(subsets),
        }
    }

    #[test]
    fn test_address_reordering_is_not_material() {
        let old = endpoints(vec![subset(&["10.0.0.1", "10.0.0.2"], &[("http", 80)])]);
        let new = endpoints(vec![subset(&["10.0.0.2", "10.0.0.1"], &[("http", 80)])]);
        assert_eq!(subsets_digest(&old), subsets_digest(&new));
        assert!(!Endpoints::is_material_update(&BTreeSet::new(), &old, &new));
    }

    #[test]
    fn test_subset_reordering_is_not_material() {
        let old = endpoints(vec![
            subset(&["10.0.0.1"], &[("http", 80)]),
            subset(&["10.0.0.9"], &[("sip", 5060)]),
        ]);
        let new = endpoints(vec![
            subset(&["10.0.0.9"], &[("sip", 5060)]),
            subset(&["10.0.0.1"], &[("http", 80)]),
        ]);
        assert!(!Endpoints::is_material_update(&BTreeSet::new(), &old, &new));
    }

    #[test]
    fn test_added_address_is_material() {
        let old = endpoints(vec![subset(&["10.0.0.1", "10.0.0.2"], &[("http", 80)])]);
        let new = endpoints(vec![subset(
            &["10.0.0.1", "10.0.0.2", "10.0.0.3"],
            &[("http", 80)],
        )]);
        assert!(Endpoints::is_material_update(&BTreeSet::new(), &old, &new));
    }

    #[test]
    fn test_removed_address_is_material() {
        let old = endpoints(vec![subset(&["10.0.0.1", "10.0.0.2"], &[("http", 80)])]);
        let new = endpoints(vec![subset(&["10.0.0.1"], &[("http", 80)])]);
        assert!(Endpoints::is_material_update(&BTreeSet::new(), &old, &new));
    }

    #[test]
    fn test_port_change_is_material() {
        let old = endpoints(vec![subset(&["10.0.0.1"], &[("http", 80)])]);
        let new = endpoints(vec![subset(&["10.0.0.1"], &[("http", 8080)])]);
        assert!(Endpoints::is_material_update(&BTreeSet::new(), &old, &new));
    }

    #[test]
    fn test_empty_endpoints_digest_is_stable() {
        let a = Endpoints::default();
        let b = endpoints(vec![]);
        assert_eq!(subsets_digest(&a), subsets_digest(&b));
    }

    #[test]
    fn test_endpoint_ips_keep_reported_order() {
        let ep = endpoints(vec![
            subset(&["10.0.0.3", "10.0.0.1"], &[("http", 80)]),
            subset(&["10.0.0.2"], &[("http", 80)]),
        ]);
        assert_eq!(endpoint_ips(&ep), vec!["10.0.0.3", "10.0.0.1", "10.0.0.2"]);
    }
}
