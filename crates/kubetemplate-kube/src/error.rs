//! Error types for kubetemplate-kube

use kube::runtime::watcher;
use thiserror::Error;

use crate::kinds::ResourceKind;

/// Result type for kubetemplate-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while watching the control plane
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Error reported by the underlying watch stream
    #[error("watch error: {0}")]
    Watch(#[from] watcher::Error),

    /// A watch subscription terminated abnormally; the namespace cache is stale
    #[error("watch of {kind} in namespace '{namespace}' failed: {message}\nHint: restart kubetemplate to rebuild the cache")]
    WatchFailed {
        namespace: String,
        kind: ResourceKind,
        message: String,
    },

    /// A watch subscription hit an error it recovers from by re-listing
    #[error("watch of {kind} in namespace '{namespace}' interrupted: {message}")]
    Interrupted {
        namespace: String,
        kind: ResourceKind,
        message: String,
    },

    /// A watch subscription ended without an error
    #[error("watch of {kind} in namespace '{namespace}' closed unexpectedly")]
    StreamClosed {
        namespace: String,
        kind: ResourceKind,
    },

    /// The cache for a kind stopped before its initial listing completed
    #[error("cache of {kind} in namespace '{namespace}' was never populated")]
    NeverSynced {
        namespace: String,
        kind: ResourceKind,
    },

    /// `run` was called twice on the same namespace controller
    #[error("namespace '{0}' is already being monitored")]
    AlreadyRunning(String),

    /// A watch task panicked or was aborted
    #[error("watch task for namespace '{namespace}' ended abnormally: {message}")]
    TaskFailed { namespace: String, message: String },

    /// Object could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Object is missing required metadata
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this error ended a watch loop
    pub fn is_watch_failure(&self) -> bool {
        matches!(
            self,
            KubeError::WatchFailed { .. }
                | KubeError::StreamClosed { .. }
                | KubeError::TaskFailed { .. }
        )
    }

    /// Check if a watch stream keeps going after reporting this error
    ///
    /// The watcher backs off and re-lists after transient API errors. Denied
    /// access is not transient.
    pub fn is_recoverable(&self) -> bool {
        match self {
            KubeError::Interrupted { .. } => true,
            KubeError::Watch(e) => !matches!(status_code(e), Some(401 | 403)),
            _ => false,
        }
    }
}

fn status_code(err: &watcher::Error) -> Option<u16> {
    match err {
        watcher::Error::WatchError(response) => Some(response.code),
        watcher::Error::InitialListFailed(kube::Error::Api(response))
        | watcher::Error::WatchStartFailed(kube::Error::Api(response))
        | watcher::Error::WatchFailed(kube::Error::Api(response)) => Some(response.code),
        _ => None,
    }
}
