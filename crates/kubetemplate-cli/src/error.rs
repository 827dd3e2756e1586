//! CLI error types with exit code handling

use kubetemplate_engine::{EngineError, LookupError, TemplateError};
use kubetemplate_kube::KubeError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Template parsing or rendering failed, with the source span
    #[error(transparent)]
    #[diagnostic(transparent)]
    Render(TemplateError),

    /// A resource accessor failed during rendering
    #[error("Template error: {message}")]
    #[diagnostic(code(kubetemplate::cli::template))]
    Template {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(kubetemplate::cli::io))]
    Io { message: String },

    /// The cluster could not be reached or never answered
    #[error("Cluster error: {message}")]
    #[diagnostic(code(kubetemplate::cli::cluster))]
    Cluster {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A namespace watch died; the process should be restarted
    #[error("Watch failure: {message}")]
    #[diagnostic(
        code(kubetemplate::cli::watch),
        help("the local cache is stale; let the supervisor restart kubetemplate")
    )]
    WatchFailure { message: String },

    /// Invalid configuration file
    #[error("Configuration error: {message}")]
    #[diagnostic(code(kubetemplate::cli::config))]
    Config { message: String },

    /// Invalid arguments
    #[error("{message}")]
    #[diagnostic(code(kubetemplate::cli::usage))]
    Usage { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(kubetemplate::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Render(_) | CliError::Template { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::WatchFailure { .. } => exit_codes::WATCH_FAILURE,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Config { .. } | CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        if err.is_watch_failure() {
            return CliError::WatchFailure {
                message: err.to_string(),
            };
        }
        CliError::Cluster {
            message: err.to_string(),
            help: Some("check KUBECONFIG or the in-cluster service account".to_string()),
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Template(e) => CliError::Render(e),
            EngineError::Lookup(LookupError::CacheNotSynced { namespace, timeout }) => {
                CliError::Cluster {
                    message: format!(
                        "cache of namespace '{}' did not sync within {:?}",
                        namespace, timeout
                    ),
                    help: Some("check RBAC permissions to list and watch in that namespace".to_string()),
                }
            }
            EngineError::Lookup(e) => CliError::Template {
                message: e.to_string(),
                help: None,
            },
            EngineError::WatchFailure(e) => CliError::WatchFailure {
                message: e.to_string(),
            },
            EngineError::Io(e) => e.into(),
            other => CliError::internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kubetemplate_engine::ResourceKind;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_engine_errors_map_to_exit_codes() {
        let lookup: CliError = EngineError::Lookup(LookupError::ResourceNotFound {
            kind: ResourceKind::ConfigMap,
            namespace: "voice".into(),
            name: "asterisk".into(),
        })
        .into();
        assert_eq!(lookup.exit_code(), exit_codes::TEMPLATE_ERROR);

        let render: CliError = EngineError::Template(TemplateError::simple("boom")).into();
        assert_eq!(render.exit_code(), exit_codes::TEMPLATE_ERROR);

        let sync: CliError = EngineError::Lookup(LookupError::CacheNotSynced {
            namespace: "voice".into(),
            timeout: Duration::from_secs(10),
        })
        .into();
        assert_eq!(sync.exit_code(), exit_codes::CLUSTER_ERROR);

        let watch: CliError = EngineError::WatchFailure(Arc::new(KubeError::StreamClosed {
            namespace: "voice".into(),
            kind: ResourceKind::Service,
        }))
        .into();
        assert_eq!(watch.exit_code(), exit_codes::WATCH_FAILURE);

        let io: CliError =
            EngineError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).into();
        assert_eq!(io.exit_code(), exit_codes::IO_ERROR);

        assert_eq!(CliError::from(EngineError::Closed).exit_code(), exit_codes::ERROR);
    }

    #[test]
    fn test_kube_errors_map_to_exit_codes() {
        let closed: CliError = KubeError::StreamClosed {
            namespace: "voice".into(),
            kind: ResourceKind::Endpoints,
        }
        .into();
        assert_eq!(closed.exit_code(), exit_codes::WATCH_FAILURE);

        let invalid: CliError = KubeError::InvalidObject("no name".into()).into();
        assert_eq!(invalid.exit_code(), exit_codes::CLUSTER_ERROR);
    }

    #[test]
    fn test_usage_error() {
        let err = CliError::usage("bad pair");
        assert_eq!(err.exit_code(), exit_codes::USAGE_ERROR);
        assert_eq!(err.to_string(), "bad pair");
    }
}
