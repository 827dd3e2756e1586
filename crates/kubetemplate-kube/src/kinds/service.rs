use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Service;

use super::{ResourceKind, WatchedKind};
use crate::control_plane::{ControlPlane, WatchStream};

impl WatchedKind for Service {
    const KIND: ResourceKind = ResourceKind::Service;

    fn watch(control_plane: &dyn ControlPlane, namespace: &str) -> WatchStream<Self> {
        control_plane.watch_services(namespace)
    }

    /// Any difference in the serialized spec counts; a spec that cannot be
    /// serialized is treated as changed.
    fn is_material_update(_keys: &BTreeSet<String>, old: &Self, new: &Self) -> bool {
        match (serde_json::to_vec(&old.spec), serde_json::to_vec(&new.spec)) {
            (Ok(a), Ok(b)) => a != b,
            _ => true,
        }
    }
}
