//! Per-kind resource monitors
//!
//! A [`Monitor`] owns the interest set for one kind in one namespace and a
//! reader for the local cache of that kind. Watch events are filtered down
//! to the interesting names, then checked for materiality; material events
//! raise the shared [`ChangeSignal`].

use std::fmt;
use std::sync::Arc;

use kube::ResourceExt;
use kube::runtime::reflector::{self, ObjectRef, Store, store::Writer};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{KubeError, Result};
use crate::interest::{Dependency, InterestSet};
use crate::kinds::{ResourceKind, WatchedKind};
use crate::signal::ChangeSignal;

/// A change to a watched resource, as seen against the local cache
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    /// The resource was not in the cache before
    Added(Arc<K>),
    /// The resource was replaced in the cache
    Updated { old: Arc<K>, new: Arc<K> },
    /// The resource left the cache
    Deleted(Arc<K>),
}

impl<K: WatchedKind> ResourceEvent<K> {
    /// The resource the event is about (the new state for updates)
    pub fn resource(&self) -> &K {
        match self {
            Self::Added(r) | Self::Deleted(r) => r,
            Self::Updated { new, .. } => new,
        }
    }

    pub fn name(&self) -> String {
        self.resource().name_any()
    }
}

/// Monitor for one resource kind within one namespace
pub struct Monitor<K: WatchedKind> {
    namespace: String,
    interest: RwLock<InterestSet>,
    store: Store<K>,
    signal: ChangeSignal,
}

impl<K: WatchedKind> Monitor<K> {
    /// Create a monitor and the cache writer its watch loop will feed
    pub fn new(namespace: &str, signal: ChangeSignal) -> (Self, Writer<K>) {
        let (store, writer) = reflector::store();
        let monitor = Self {
            namespace: namespace.to_string(),
            interest: RwLock::new(InterestSet::new()),
            store,
            signal,
        };
        (monitor, writer)
    }

    pub fn kind(&self) -> ResourceKind {
        K::KIND
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Register interest in a resource, optionally narrowed to one key
    ///
    /// Returns `true` if this added something new to the interest set.
    pub fn register(&self, name: &str, key: Option<&str>) -> bool {
        let added = {
            let mut interest = self.interest.write();
            match key {
                Some(key) => interest.insert_key(name, key),
                None => interest.insert_name(name),
            }
        };

        if added {
            debug!(
                namespace = %self.namespace,
                kind = %K::KIND,
                resource = name,
                key = key.unwrap_or_default(),
                "registered dependency"
            );
        }
        added
    }

    /// Event filter: only names in the interest set pass
    pub fn is_interesting(&self, name: &str) -> bool {
        self.interest.read().contains(name)
    }

    /// Decide whether an event matters to any learned template
    ///
    /// Additions and deletions of interesting resources are always material;
    /// updates defer to the kind-specific comparison.
    pub fn is_material(&self, event: &ResourceEvent<K>) -> bool {
        let name = event.name();
        let interest = self.interest.read();
        let Some(keys) = interest.keys(&name) else {
            return false;
        };

        let material = match event {
            ResourceEvent::Added(_) | ResourceEvent::Deleted(_) => true,
            ResourceEvent::Updated { old, new } => K::is_material_update(keys, old, new),
        };

        debug!(
            namespace = %self.namespace,
            kind = %K::KIND,
            resource = %name,
            material,
            "evaluated event"
        );
        material
    }

    /// Raise the shared change signal (non-blocking, coalesced)
    pub fn notify_change(&self) {
        debug!(namespace = %self.namespace, kind = %K::KIND, "signalling change");
        self.signal.emit();
    }

    /// Current cached state of a resource
    pub fn get(&self, name: &str) -> Option<Arc<K>> {
        self.store
            .get(&ObjectRef::new(name).within(&self.namespace))
    }

    /// Reader for the local cache
    pub fn store(&self) -> &Store<K> {
        &self.store
    }

    /// Snapshot of the interest set
    pub fn interest(&self) -> InterestSet {
        self.interest.read().clone()
    }

    /// Learned dependencies for this kind, in name order
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.interest
            .read()
            .iter()
            .map(|(name, keys)| Dependency {
                namespace: self.namespace.clone(),
                kind: K::KIND,
                name: name.clone(),
                keys: keys.iter().cloned().collect(),
            })
            .collect()
    }

    /// Wait until the cache has completed its first listing
    pub async fn wait_synced(&self) -> Result<()> {
        self.store
            .wait_until_ready()
            .await
            .map_err(|_| KubeError::NeverSynced {
                namespace: self.namespace.clone(),
                kind: K::KIND,
            })
    }
}

impl<K: WatchedKind> fmt::Debug for Monitor<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("namespace", &self.namespace)
            .field("kind", &K::KIND)
            .field("interest", &*self.interest.read())
            .finish_non_exhaustive()
    }
}
