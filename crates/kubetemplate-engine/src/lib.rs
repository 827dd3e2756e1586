//! Kubetemplate Engine - configuration templates over live Kubernetes data
//!
//! This crate provides:
//! - **Two-phase evaluation**: `learn` discovers what a template reads, `render` reads it from live caches
//! - **Change waiting**: one coalesced signal for every material change to a learned dependency
//! - **The `kube` template object**: ConfigMap, Secret, Service, Endpoints and network accessors
//! - **Network discovery**: hostname and private/public addresses of the running pod
//! - Human-readable template errors with source spans

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod filters;
pub mod provider;

pub use config::{DiscoveryConfig, EngineConfig};
pub use discovery::{Discoverer, DiscoveryError, LocalDiscoverer, NetworkKind, StaticDiscoverer};
pub use engine::{Engine, EngineBuilder, Template};
pub use error::{EngineError, LookupError, Result, TemplateError, TemplateErrorKind};
pub use filters::AVAILABLE_FILTERS;
pub use provider::{AVAILABLE_METHODS, DataProvider, Mode};

pub use kubetemplate_kube::{Dependency, KubeControlPlane, MockControlPlane, ResourceKind};
pub use tokio_util::sync::CancellationToken;
