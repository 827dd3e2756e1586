use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Secret;

use super::{ResourceKind, WatchedKind, keyed_value_changed};
use crate::control_plane::{ControlPlane, WatchStream};

impl WatchedKind for Secret {
    const KIND: ResourceKind = ResourceKind::Secret;

    fn watch(control_plane: &dyn ControlPlane, namespace: &str) -> WatchStream<Self> {
        control_plane.watch_secrets(namespace)
    }

    // ByteString has already been base64-decoded by the deserializer
    fn is_material_update(keys: &BTreeSet<String>, old: &Self, new: &Self) -> bool {
        keys.iter().any(|key| {
            keyed_value_changed(old.data.as_ref(), new.data.as_ref(), key, |a, b| a.0 == b.0)
        })
    }
}
