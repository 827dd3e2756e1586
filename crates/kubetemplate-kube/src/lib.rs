//! Kubetemplate Kube - watch plumbing for kubetemplate
//!
//! This crate provides:
//! - **Control plane seam**: one watch subscription per (namespace, kind), backed by `kube::runtime`
//! - **Monitors**: per-kind interest sets, local caches and materiality rules
//! - **Namespace controllers**: the four monitors of a namespace and their watch loops
//! - **Change signal**: a coalesced, capacity-one "something changed" notification
//! - **Mock control plane**: in-memory watches for tests

pub mod control_plane;
pub mod error;
pub mod interest;
pub mod kinds;
pub mod mock;
pub mod monitor;
pub mod namespace;
pub mod signal;

pub use control_plane::{ControlPlane, KubeControlPlane, WatchStream};
pub use error::{KubeError, Result};
pub use interest::{Dependency, InterestSet};
pub use kinds::{ResourceKind, WatchedKind, endpoint_ips, subsets_digest};
pub use mock::MockControlPlane;
pub use monitor::{Monitor, ResourceEvent};
pub use namespace::NamespaceController;
pub use signal::ChangeSignal;
