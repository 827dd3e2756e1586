//! In-memory control plane for testing
//!
//! Objects are kept per (kind, namespace) as JSON and replayed to every new
//! subscription as an initial listing, followed by live events. Tests drive
//! it with [`apply`](MockControlPlane::apply), [`delete`](MockControlPlane::delete),
//! [`interrupt`](MockControlPlane::interrupt) and [`fail`](MockControlPlane::fail).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use kube::Resource;
use kube::runtime::watcher::Event;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::control_plane::{ControlPlane, WatchStream};
use crate::error::{KubeError, Result};
use crate::kinds::{ResourceKind, WatchedKind};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum MockEvent {
    Apply(Value),
    Delete(Value),
    /// Recoverable error, followed by a re-listing of `snapshot`
    Interrupt { message: String, snapshot: Vec<Value> },
    Fail(String),
}

#[derive(Debug)]
struct Channel {
    objects: BTreeMap<String, Value>,
    events: broadcast::Sender<MockEvent>,
    watches: usize,
}

impl Channel {
    fn new() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            objects: BTreeMap::new(),
            events,
            watches: 0,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    channels: HashMap<(ResourceKind, String), Channel>,
    revision: u64,
}

impl MockState {
    fn channel(&mut self, kind: ResourceKind, namespace: &str) -> &mut Channel {
        self.channels
            .entry((kind, namespace.to_string()))
            .or_insert_with(Channel::new)
    }
}

/// Control plane that serves watches from memory
#[derive(Debug, Clone, Default)]
pub struct MockControlPlane {
    state: Arc<Mutex<MockState>>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an object and notify open watches
    ///
    /// The object must carry a name and a namespace. Its resource version is
    /// overwritten with a fresh one, as an API server would.
    pub fn apply<K: WatchedKind>(&self, obj: K) -> Result<()> {
        let meta = obj.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| KubeError::InvalidObject(format!("{} without a name", K::KIND)))?;
        let namespace = meta.namespace.clone().ok_or_else(|| {
            KubeError::InvalidObject(format!("{} '{}' without a namespace", K::KIND, name))
        })?;

        let mut value = serde_json::to_value(&obj)?;

        let mut state = self.state.lock();
        state.revision += 1;
        let revision = state.revision.to_string();
        if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("resourceVersion".to_string(), Value::String(revision));
        }

        let channel = state.channel(K::KIND, &namespace);
        channel.objects.insert(name, value.clone());
        // no open watches is fine
        let _ = channel.events.send(MockEvent::Apply(value));
        Ok(())
    }

    /// Remove an object; returns whether it existed
    pub fn delete<K: WatchedKind>(&self, namespace: &str, name: &str) -> bool {
        let mut state = self.state.lock();
        let channel = state.channel(K::KIND, namespace);
        match channel.objects.remove(name) {
            Some(value) => {
                let _ = channel.events.send(MockEvent::Delete(value));
                true
            }
            None => false,
        }
    }

    /// Make every open watch of this kind in `namespace` report a
    /// recoverable error, then re-list the current objects as a recovering
    /// watcher does
    pub fn interrupt<K: WatchedKind>(&self, namespace: &str, message: &str) {
        let mut state = self.state.lock();
        let channel = state.channel(K::KIND, namespace);
        let snapshot = channel.objects.values().cloned().collect();
        let _ = channel.events.send(MockEvent::Interrupt {
            message: message.to_string(),
            snapshot,
        });
    }

    /// Make every open watch of this kind in `namespace` report a fatal error
    pub fn fail<K: WatchedKind>(&self, namespace: &str, message: &str) {
        let mut state = self.state.lock();
        let channel = state.channel(K::KIND, namespace);
        let _ = channel.events.send(MockEvent::Fail(message.to_string()));
    }

    /// Current stored state of an object
    pub fn get<K: WatchedKind>(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.state.lock();
        let value = state
            .channels
            .get(&(K::KIND, namespace.to_string()))?
            .objects
            .get(name)?
            .clone();
        serde_json::from_value(value).ok()
    }

    /// Number of subscriptions ever opened for (kind, namespace)
    pub fn watch_count(&self, kind: ResourceKind, namespace: &str) -> usize {
        self.state
            .lock()
            .channels
            .get(&(kind, namespace.to_string()))
            .map(|c| c.watches)
            .unwrap_or(0)
    }

    fn watch<K: WatchedKind>(&self, namespace: &str) -> WatchStream<K> {
        // snapshot and subscribe under one lock so no event falls in between
        let (snapshot, rx) = {
            let mut state = self.state.lock();
            let channel = state.channel(K::KIND, namespace);
            channel.watches += 1;
            let snapshot: Vec<Value> = channel.objects.values().cloned().collect();
            (snapshot, channel.events.subscribe())
        };

        let namespace = namespace.to_string();
        let pending: VecDeque<Result<Event<K>>> = listing::<K>(snapshot).collect();
        stream::unfold((rx, pending, namespace), |(mut rx, mut pending, namespace)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (rx, pending, namespace)));
                }
                let item = match rx.recv().await {
                    Ok(MockEvent::Apply(v)) => decode::<K>(v).map(Event::Apply),
                    Ok(MockEvent::Delete(v)) => decode::<K>(v).map(Event::Delete),
                    Ok(MockEvent::Interrupt { message, snapshot }) => {
                        pending.extend(listing::<K>(snapshot));
                        Err(KubeError::Interrupted {
                            namespace: namespace.clone(),
                            kind: K::KIND,
                            message,
                        })
                    }
                    Ok(MockEvent::Fail(message)) => Err(KubeError::WatchFailed {
                        namespace: namespace.clone(),
                        kind: K::KIND,
                        message,
                    }),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                };
                return Some((item, (rx, pending, namespace)));
            }
        })
        .boxed()
    }
}

/// `Init`, one `InitApply` per object, `InitDone`
fn listing<K: WatchedKind>(snapshot: Vec<Value>) -> impl Iterator<Item = Result<Event<K>>> {
    std::iter::once(Ok(Event::Init))
        .chain(
            snapshot
                .into_iter()
                .map(|v| decode::<K>(v).map(Event::InitApply)),
        )
        .chain(std::iter::once(Ok(Event::InitDone)))
}

fn decode<K: WatchedKind>(value: Value) -> Result<K> {
    Ok(serde_json::from_value(value)?)
}

impl ControlPlane for MockControlPlane {
    fn watch_config_maps(&self, namespace: &str) -> WatchStream<ConfigMap> {
        self.watch(namespace)
    }

    fn watch_secrets(&self, namespace: &str) -> WatchStream<Secret> {
        self.watch(namespace)
    }

    fn watch_services(&self, namespace: &str) -> WatchStream<Service> {
        self.watch(namespace)
    }

    fn watch_endpoints(&self, namespace: &str) -> WatchStream<Endpoints> {
        self.watch(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn config_map(name: &str, ns: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: ns.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_watch_replays_listing_then_live_events() {
        let mock = MockControlPlane::new();
        mock.apply(config_map("a", Some("ns1"))).unwrap();

        let mut stream = mock.watch_config_maps("ns1");
        assert!(matches!(stream.next().await, Some(Ok(Event::Init))));
        match stream.next().await {
            Some(Ok(Event::InitApply(cm))) => assert_eq!(cm.metadata.name.as_deref(), Some("a")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(stream.next().await, Some(Ok(Event::InitDone))));

        mock.apply(config_map("b", Some("ns1"))).unwrap();
        match stream.next().await {
            Some(Ok(Event::Apply(cm))) => assert_eq!(cm.metadata.name.as_deref(), Some("b")),
            other => panic!("unexpected event: {:?}", other),
        }

        assert!(mock.delete::<ConfigMap>("ns1", "a"));
        assert!(matches!(stream.next().await, Some(Ok(Event::Delete(_)))));
        assert_eq!(mock.watch_count(ResourceKind::ConfigMap, "ns1"), 1);
    }

    #[tokio::test]
    async fn test_fail_surfaces_as_stream_error() {
        let mock = MockControlPlane::new();
        let mut stream = mock.watch_secrets("ns1");
        for _ in 0..2 {
            stream.next().await;
        }

        mock.fail::<Secret>("ns1", "boom");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_interrupt_is_followed_by_relisting() {
        let mock = MockControlPlane::new();
        mock.apply(config_map("a", Some("ns1"))).unwrap();
        let mut stream = mock.watch_config_maps("ns1");
        for _ in 0..3 {
            stream.next().await;
        }

        mock.apply(config_map("b", Some("ns1"))).unwrap();
        mock.interrupt::<ConfigMap>("ns1", "410 Gone");
        mock.apply(config_map("c", Some("ns1"))).unwrap();

        assert!(matches!(stream.next().await, Some(Ok(Event::Apply(_)))));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("410 Gone"));

        assert!(matches!(stream.next().await, Some(Ok(Event::Init))));
        let mut relisted = Vec::new();
        while let Some(Ok(Event::InitApply(cm))) = stream.next().await {
            relisted.push(cm.metadata.name.unwrap_or_default());
        }
        assert_eq!(relisted, vec!["a", "b"]);

        match stream.next().await {
            Some(Ok(Event::Apply(cm))) => assert_eq!(cm.metadata.name.as_deref(), Some("c")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_apply_requires_namespace() {
        let mock = MockControlPlane::new();
        let err = mock.apply(config_map("a", None)).unwrap_err();
        assert!(matches!(err, KubeError::InvalidObject(_)));
    }

    #[test]
    fn test_apply_bumps_resource_version() {
        let mock = MockControlPlane::new();
        mock.apply(config_map("a", Some("ns1"))).unwrap();
        mock.apply(config_map("a", Some("ns1"))).unwrap();

        let cm = mock.get::<ConfigMap>("ns1", "a").unwrap();
        assert_eq!(cm.metadata.resource_version.as_deref(), Some("2"));
        assert!(mock.get::<ConfigMap>("ns2", "a").is_none());
        assert!(!mock.delete::<ConfigMap>("ns1", "missing"));
    }
}
