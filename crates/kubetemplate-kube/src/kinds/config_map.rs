use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::ConfigMap;

use super::{ResourceKind, WatchedKind, keyed_value_changed};
use crate::control_plane::{ControlPlane, WatchStream};

impl WatchedKind for ConfigMap {
    const KIND: ResourceKind = ResourceKind::ConfigMap;

    fn watch(control_plane: &dyn ControlPlane, namespace: &str) -> WatchStream<Self> {
        control_plane.watch_config_maps(namespace)
    }

    fn is_material_update(keys: &BTreeSet<String>, old: &Self, new: &Self) -> bool {
        keys.iter()
            .any(|key| keyed_value_changed(old.data.as_ref(), new.data.as_ref(), key, |a, b| a == b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("app-cfg".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    fn keys(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_changed_key_is_material() {
        let old = config_map(&[("LOG_LEVEL", "info")]);
        let new = config_map(&[("LOG_LEVEL", "debug")]);
        assert!(ConfigMap::is_material_update(&keys(&["LOG_LEVEL"]), &old, &new));
    }

    #[test]
    fn test_unrelated_key_is_not_material() {
        let old = config_map(&[("LOG_LEVEL", "info"), ("OTHER", "a")]);
        let new = config_map(&[("LOG_LEVEL", "info"), ("OTHER", "b")]);
        assert!(!ConfigMap::is_material_update(&keys(&["LOG_LEVEL"]), &old, &new));
    }

    #[test]
    fn test_metadata_churn_is_not_material() {
        let old = config_map(&[("LOG_LEVEL", "info")]);
        let mut new = old.clone();
        new.metadata.resource_version = Some("42".to_string());
        assert!(!ConfigMap::is_material_update(&keys(&["LOG_LEVEL"]), &old, &new));
    }

    #[test]
    fn test_key_appearing_or_vanishing_is_material() {
        let without = config_map(&[("OTHER", "a")]);
        let with = config_map(&[("OTHER", "a"), ("LOG_LEVEL", "info")]);
        assert!(ConfigMap::is_material_update(&keys(&["LOG_LEVEL"]), &without, &with));
        assert!(ConfigMap::is_material_update(&keys(&["LOG_LEVEL"]), &with, &without));
    }

    #[test]
    fn test_missing_data_map_is_material() {
        let old = ConfigMap::default();
        let new = config_map(&[("LOG_LEVEL", "info")]);
        assert!(ConfigMap::is_material_update(&keys(&["LOG_LEVEL"]), &old, &new));
    }
}
