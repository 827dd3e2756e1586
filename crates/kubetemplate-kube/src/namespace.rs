//! Namespace controller
//!
//! One [`NamespaceController`] exists per namespace referenced by a template.
//! It owns one [`Monitor`] per resource kind and, once [`run`] is called,
//! one watch loop per kind. Each loop keeps the monitor's cache current and
//! raises the change signal for material events.
//!
//! [`run`]: NamespaceController::run

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use kube::ResourceExt;
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher::Event;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control_plane::ControlPlane;
use crate::error::{KubeError, Result};
use crate::interest::Dependency;
use crate::kinds::WatchedKind;
use crate::monitor::{Monitor, ResourceEvent};
use crate::signal::ChangeSignal;

/// Cache writers, handed to the watch loops when the controller starts
struct Writers {
    config_maps: Writer<ConfigMap>,
    endpoints: Writer<Endpoints>,
    secrets: Writer<Secret>,
    services: Writer<Service>,
}

/// Monitors and watch loops for a single namespace
pub struct NamespaceController {
    name: String,
    control_plane: Arc<dyn ControlPlane>,
    resync: Duration,

    pub config_maps: Arc<Monitor<ConfigMap>>,
    pub endpoints: Arc<Monitor<Endpoints>>,
    pub secrets: Arc<Monitor<Secret>>,
    pub services: Arc<Monitor<Service>>,

    writers: Mutex<Option<Writers>>,
}

impl NamespaceController {
    /// Create the controller; nothing is watched until [`run`](Self::run)
    pub fn new(
        name: &str,
        control_plane: Arc<dyn ControlPlane>,
        resync: Duration,
        changes: ChangeSignal,
    ) -> Self {
        let (config_maps, cm_writer) = Monitor::new(name, changes.clone());
        let (endpoints, ep_writer) = Monitor::new(name, changes.clone());
        let (secrets, secret_writer) = Monitor::new(name, changes.clone());
        let (services, svc_writer) = Monitor::new(name, changes);

        Self {
            name: name.to_string(),
            control_plane,
            resync,
            config_maps: Arc::new(config_maps),
            endpoints: Arc::new(endpoints),
            secrets: Arc::new(secrets),
            services: Arc::new(services),
            writers: Mutex::new(Some(Writers {
                config_maps: cm_writer,
                endpoints: ep_writer,
                secrets: secret_writer,
                services: svc_writer,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the four watch loops until `stop` fires or a loop fails
    ///
    /// The first failing loop stops the other three, since the namespace
    /// cache is no longer consistent. Returns once all loops have exited,
    /// with the first failure.
    pub async fn run(self: Arc<Self>, stop: CancellationToken) -> Result<()> {
        let writers = self
            .writers
            .lock()
            .take()
            .ok_or_else(|| KubeError::AlreadyRunning(self.name.clone()))?;

        info!(namespace = %self.name, "starting namespace monitors");

        let stop = stop.child_token();
        let mut loops = JoinSet::new();
        loops.spawn(watch_loop(
            self.config_maps.clone(),
            writers.config_maps,
            self.control_plane.clone(),
            self.resync,
            stop.clone(),
        ));
        loops.spawn(watch_loop(
            self.endpoints.clone(),
            writers.endpoints,
            self.control_plane.clone(),
            self.resync,
            stop.clone(),
        ));
        loops.spawn(watch_loop(
            self.secrets.clone(),
            writers.secrets,
            self.control_plane.clone(),
            self.resync,
            stop.clone(),
        ));
        loops.spawn(watch_loop(
            self.services.clone(),
            writers.services,
            self.control_plane.clone(),
            self.resync,
            stop.clone(),
        ));

        let mut outcome = Ok(());
        while let Some(joined) = loops.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(KubeError::TaskFailed {
                    namespace: self.name.clone(),
                    message: e.to_string(),
                })
            });
            if let Err(e) = result {
                if outcome.is_ok() {
                    stop.cancel();
                    outcome = Err(e);
                }
            }
        }

        debug!(namespace = %self.name, "namespace monitors stopped");
        outcome
    }

    /// Wait until all four caches have completed their first listing
    pub async fn wait_synced(&self) -> Result<()> {
        tokio::try_join!(
            self.config_maps.wait_synced(),
            self.endpoints.wait_synced(),
            self.secrets.wait_synced(),
            self.services.wait_synced(),
        )?;
        Ok(())
    }

    /// Every dependency learned in this namespace
    pub fn dependencies(&self) -> Vec<Dependency> {
        let mut deps = self.config_maps.dependencies();
        deps.extend(self.endpoints.dependencies());
        deps.extend(self.secrets.dependencies());
        deps.extend(self.services.dependencies());
        deps.sort();
        deps
    }
}

impl fmt::Debug for NamespaceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceController")
            .field("name", &self.name)
            .field("resync", &self.resync)
            .field("config_maps", &self.config_maps)
            .field("endpoints", &self.endpoints)
            .field("secrets", &self.secrets)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// Event ingestion for one (namespace, kind)
///
/// Opens a subscription, feeds the cache and re-subscribes every `resync`
/// (zero disables) to force a fresh listing. Recoverable stream errors are
/// logged while the stream re-lists; any other error, or the stream ending,
/// is fatal.
async fn watch_loop<K: WatchedKind>(
    monitor: Arc<Monitor<K>>,
    writer: Writer<K>,
    control_plane: Arc<dyn ControlPlane>,
    resync: Duration,
    stop: CancellationToken,
) -> Result<()> {
    let namespace = monitor.namespace().to_string();
    let mut ingest = Ingest::new(&monitor, writer);

    loop {
        let mut stream = K::watch(control_plane.as_ref(), &namespace);
        let resync_timer = resync_after(resync);
        tokio::pin!(resync_timer);

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    debug!(namespace = %namespace, kind = %K::KIND, "watch stopped");
                    return Ok(());
                }
                _ = &mut resync_timer => {
                    debug!(namespace = %namespace, kind = %K::KIND, "resyncing");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        ingest.apply(event);
                    }
                    Some(Err(e)) if e.is_recoverable() => {
                        warn!(namespace = %namespace, kind = %K::KIND, error = %e, "watch interrupted, waiting for it to recover");
                    }
                    Some(Err(e)) => {
                        let err = match e {
                            e @ KubeError::WatchFailed { .. } => e,
                            other => KubeError::WatchFailed {
                                namespace: namespace.clone(),
                                kind: K::KIND,
                                message: other.to_string(),
                            },
                        };
                        error!(namespace = %namespace, kind = %K::KIND, error = %err, "watch failed");
                        return Err(err);
                    }
                    None => {
                        error!(namespace = %namespace, kind = %K::KIND, "watch stream closed");
                        return Err(KubeError::StreamClosed {
                            namespace: namespace.clone(),
                            kind: K::KIND,
                        });
                    }
                },
            }
        }
    }
}

async fn resync_after(period: Duration) {
    if period.is_zero() {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(period).await;
    }
}

/// State of a listing in progress (between `Init` and `InitDone`)
#[derive(Default)]
struct Relist {
    seen: HashSet<String>,
    changed: bool,
}

/// Turns raw watch events into cache updates and change signals
///
/// Events are classified against the cache before they are applied, which
/// gives the (old, new) pair for updates. The first listing only populates
/// the cache; later listings are diffed against it and signalled once, when
/// the new snapshot has been swapped in.
struct Ingest<'a, K: WatchedKind> {
    monitor: &'a Monitor<K>,
    writer: Writer<K>,
    relist: Option<Relist>,
    synced: bool,
}

impl<'a, K: WatchedKind> Ingest<'a, K> {
    fn new(monitor: &'a Monitor<K>, writer: Writer<K>) -> Self {
        Self {
            monitor,
            writer,
            relist: None,
            synced: false,
        }
    }

    /// Apply one event; returns whether a change was signalled
    fn apply(&mut self, event: Event<K>) -> bool {
        let material = match &event {
            Event::Init => {
                self.relist = Some(Relist::default());
                false
            }
            Event::InitApply(obj) => {
                let changed = self.synced && self.is_material_upsert(obj);
                let relist = self.relist.get_or_insert_with(Relist::default);
                relist.seen.insert(obj.name_any());
                relist.changed |= changed;
                false
            }
            Event::InitDone => {
                let relist = self.relist.take().unwrap_or_default();
                let mut changed = relist.changed;
                if self.synced {
                    for old in self.monitor.store().state() {
                        if !relist.seen.contains(&old.name_any()) {
                            changed |= self.monitor.is_material(&ResourceEvent::Deleted(old));
                        }
                    }
                }
                changed
            }
            Event::Apply(obj) => self.is_material_upsert(obj),
            Event::Delete(obj) => {
                self.monitor.is_interesting(&obj.name_any())
                    && self
                        .monitor
                        .is_material(&ResourceEvent::Deleted(Arc::new(obj.clone())))
            }
        };

        self.writer.apply_watcher_event(&event);

        if matches!(event, Event::InitDone) && !self.synced {
            self.synced = true;
            debug!(
                namespace = %self.monitor.namespace(),
                kind = %K::KIND,
                objects = self.monitor.store().len(),
                "initial listing complete"
            );
        }

        if material {
            self.monitor.notify_change();
        }
        material
    }

    /// Classify an added or replaced object against the cache; names no
    /// template reads are dropped before that
    fn is_material_upsert(&self, obj: &K) -> bool {
        let name = obj.name_any();
        if !self.monitor.is_interesting(&name) {
            return false;
        }
        let new = Arc::new(obj.clone());
        let event = match self.monitor.get(&name) {
            Some(old) => ResourceEvent::Updated { old, new },
            None => ResourceEvent::Added(new),
        };
        self.monitor.is_material(&event)
    }
}
