//! Control-plane seam
//!
//! A [`ControlPlane`] opens one continuous watch subscription per
//! (namespace, kind). The namespace controller feeds those events into its
//! local caches; nothing in the core issues point-in-time requests.
//!
//! [`KubeControlPlane`] is the production implementation backed by
//! `kube::runtime::watcher` with the default backoff, so transient API
//! errors surface as stream items and the watch re-lists on its own. [`crate::MockControlPlane`] serves tests.

use std::fmt;

use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use kube::Api;
use kube::runtime::{WatchStreamExt, watcher};

use crate::error::{KubeError, Result};
use crate::kinds::WatchedKind;

/// Stream of watch events for one (namespace, kind)
pub type WatchStream<K> = BoxStream<'static, Result<watcher::Event<K>>>;

/// Source of watch subscriptions
///
/// Every stream must start with `Init`, `InitApply`* and `InitDone`, then
/// deliver `Apply`/`Delete` events; a fresh subscription re-lists.
pub trait ControlPlane: fmt::Debug + Send + Sync + 'static {
    fn watch_config_maps(&self, namespace: &str) -> WatchStream<ConfigMap>;

    fn watch_secrets(&self, namespace: &str) -> WatchStream<Secret>;

    fn watch_services(&self, namespace: &str) -> WatchStream<Service>;

    fn watch_endpoints(&self, namespace: &str) -> WatchStream<Endpoints>;
}

/// Control plane backed by a Kubernetes API server
#[derive(Clone)]
pub struct KubeControlPlane {
    client: kube::Client,
}

impl KubeControlPlane {
    /// Connect using the default kubeconfig or in-cluster service account
    pub async fn try_default() -> Result<Self> {
        let client = kube::Client::try_default().await?;
        Ok(Self::with_client(client))
    }

    /// Create with an existing Kubernetes client
    pub fn with_client(client: kube::Client) -> Self {
        Self { client }
    }

    fn watch<K: WatchedKind>(&self, namespace: &str) -> WatchStream<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        watcher(api, watcher::Config::default())
            .default_backoff()
            .map_err(KubeError::from)
            .boxed()
    }
}

impl fmt::Debug for KubeControlPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeControlPlane").finish_non_exhaustive()
    }
}

impl ControlPlane for KubeControlPlane {
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
