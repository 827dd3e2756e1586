//! The `kube` object templates read cluster data through
//!
//! A [`DataProvider`] is created for every learn or render pass and bound
//! into the template environment as the global `kube`.
//!
//! # Usage in Templates
//!
//! ```jinja2
//! {# key of a ConfigMap; namespace may be omitted for the default one #}
//! log_level = {{ kube.config_map("app-cfg", "voice", "LOG_LEVEL") }}
//! password = {{ kube.secret("creds", "PASSWORD") }}
//!
//! {# services and endpoints are the Kubernetes objects #}
//! proxy = {{ kube.service("sip-proxy").spec.clusterIP }}
//! {% for ip in kube.endpoint_ips("media") %}
//! media = {{ ip }}
//! {% endfor %}
//!
//! bind = {{ kube.network("privatev4") }}
//! ```
//!
//! While learning, every accessor registers its resource with the
//! namespace's monitors, creating the namespace on first use, and a failed
//! lookup yields an empty value of the accessor's type, so filters applied
//! to it still run. While rendering, a namespace that was
//! never learned is an error, and so is any other failed lookup.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Service};
use kubetemplate_kube::{Monitor, NamespaceController, WatchedKind, endpoint_ips};
use minijinja::value::{Object, ObjectRepr, Value, from_args};
use minijinja::{Error, ErrorKind};
use tracing::{debug, warn};

use crate::discovery::NetworkKind;
use crate::engine::Shared;
use crate::error::LookupError;

/// Methods of the `kube` object, in snake_case form
pub const AVAILABLE_METHODS: &[&str] = &[
    "config_map",
    "secret",
    "secret_binary",
    "env",
    "service",
    "service_ip",
    "endpoints",
    "endpoint_ips",
    "network",
];

/// Evaluation pass the provider is bound into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Learning,
    Rendering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accessor {
    ConfigMap,
    Secret,
    SecretBinary,
    Env,
    Service,
    ServiceIp,
    Endpoints,
    EndpointIps,
    Network,
}

impl Accessor {
    fn from_method(method: &str) -> Option<Self> {
        Some(match method {
            "config_map" | "ConfigMap" => Self::ConfigMap,
            "secret" | "Secret" => Self::Secret,
            "secret_binary" | "SecretBinary" => Self::SecretBinary,
            "env" | "Env" => Self::Env,
            "service" | "Service" => Self::Service,
            "service_ip" | "ServiceIP" => Self::ServiceIp,
            "endpoints" | "Endpoints" => Self::Endpoints,
            "endpoint_ips" | "EndpointIPs" => Self::EndpointIps,
            "network" | "Network" => Self::Network,
            _ => return None,
        })
    }

    /// Empty value standing in for a failed lookup while learning
    fn placeholder(self) -> Value {
        match self {
            Self::ConfigMap | Self::Secret | Self::Env | Self::ServiceIp | Self::Network => {
                Value::from("")
            }
            Self::SecretBinary => Value::from_bytes(Vec::new()),
            Self::EndpointIps => Value::from(Vec::<Value>::new()),
            Self::Service | Self::Endpoints => {
                Value::from_serialize(BTreeMap::<String, Value>::new())
            }
        }
    }
}

/// Template-facing accessor object for one learn or render pass
pub struct DataProvider {
    shared: Arc<Shared>,
    mode: Mode,
}

impl DataProvider {
    pub(crate) fn new(shared: Arc<Shared>, mode: Mode) -> Self {
        Self { shared, mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Value of a ConfigMap key; empty if the key is absent
    pub fn config_map(&self, name: &str, namespace: &str, key: &str) -> Result<String, LookupError> {
        let controller = self.controller(namespace, |c| {
            c.config_maps.register(name, Some(key));
        })?;
        let config_map = fetch(&controller.config_maps, name)?;

        Ok(config_map
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .cloned()
            .unwrap_or_default())
    }

    /// Value of a Secret key as text; empty if the key is absent
    ///
    /// The API's base64 transport encoding is already undone when the
    /// object is decoded, so this only requires the bytes to be UTF-8.
    pub fn secret(&self, name: &str, namespace: &str, key: &str) -> Result<String, LookupError> {
        let bytes = self.secret_binary(name, namespace, key)?;
        String::from_utf8(bytes).map_err(|_| LookupError::DecodeFailure {
            namespace: self.resolve_namespace(namespace).unwrap_or_default(),
            name: name.to_string(),
            key: key.to_string(),
        })
    }

    /// Raw bytes of a Secret key; empty if the key is absent
    pub fn secret_binary(&self, name: &str, namespace: &str, key: &str) -> Result<Vec<u8>, LookupError> {
        let controller = self.controller(namespace, |c| {
            c.secrets.register(name, Some(key));
        })?;
        let secret = fetch(&controller.secrets, name)?;

        Ok(secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|bytes| bytes.0.clone())
            .unwrap_or_default())
    }

    /// Process environment variable; empty if unset
    pub fn env(&self, name: &str) -> String {
        env_function(name.to_string())
    }

    pub fn service(&self, name: &str, namespace: &str) -> Result<Arc<Service>, LookupError> {
        let controller = self.controller(namespace, |c| {
            c.services.register(name, None);
        })?;
        fetch(&controller.services, name)
    }

    /// Cluster IP of a Service; empty for a Service without one
    pub fn service_ip(&self, name: &str, namespace: &str) -> Result<String, LookupError> {
        let service = self.service(name, namespace)?;
        Ok(service
            .spec
            .as_ref()
            .and_then(|spec| spec.cluster_ip.clone())
            .unwrap_or_default())
    }

    pub fn endpoints(&self, name: &str, namespace: &str) -> Result<Arc<Endpoints>, LookupError> {
        let controller = self.controller(namespace, |c| {
            c.endpoints.register(name, None);
        })?;
        fetch(&controller.endpoints, name)
    }

    /// Addresses of all subsets, in the order the control plane reports them
    pub fn endpoint_ips(&self, name: &str, namespace: &str) -> Result<Vec<String>, LookupError> {
        let endpoints = self.endpoints(name, namespace)?;
        Ok(endpoint_ips(&endpoints))
    }

    pub fn network(&self, kind: &str) -> Result<String, LookupError> {
        let kind: NetworkKind = kind.parse()?;
        Ok(self.shared.discoverer().lookup(kind)?)
    }

    fn resolve_namespace(&self, namespace: &str) -> Result<String, LookupError> {
        if !namespace.is_empty() {
            return Ok(namespace.to_string());
        }
        self.shared
            .default_namespace()
            .map(str::to_string)
            .ok_or(LookupError::NoDefaultNamespace)
    }

    /// Namespace controller for an accessor, registering interest while learning
    fn controller(
        &self,
        namespace: &str,
        register: impl FnOnce(&NamespaceController),
    ) -> Result<Arc<NamespaceController>, LookupError> {
        let namespace = self.resolve_namespace(namespace)?;
        match self.mode {
            Mode::Learning => {
                let controller = self.shared.namespace_or_create(&namespace);
                register(&controller);
                Ok(controller)
            }
            Mode::Rendering => self
                .shared
                .namespace(&namespace)
                .ok_or(LookupError::NamespaceNotMonitored { namespace }),
        }
    }

    fn finish(
        &self,
        accessor: Accessor,
        method: &str,
        result: Result<Value, LookupError>,
    ) -> Result<Value, Error> {
        match (result, self.mode) {
            (Ok(value), _) => Ok(value),
            (Err(e @ LookupError::ResourceNotFound { .. }), Mode::Learning) => {
                debug!(method, error = %e, "resource not cached yet while learning");
                Ok(accessor.placeholder())
            }
            (Err(e), Mode::Learning) => {
                warn!(method, error = %e, "lookup failed while learning");
                Ok(accessor.placeholder())
            }
            (Err(e), Mode::Rendering) => {
                Err(Error::new(ErrorKind::InvalidOperation, e.to_string()).with_source(e))
            }
        }
    }
}

fn fetch<K: WatchedKind>(monitor: &Monitor<K>, name: &str) -> Result<Arc<K>, LookupError> {
    monitor.get(name).ok_or_else(|| LookupError::ResourceNotFound {
        kind: K::KIND,
        namespace: monitor.namespace().to_string(),
        name: name.to_string(),
    })
}

/// `env(name)` global function
pub fn env_function(name: String) -> String {
    std::env::var(name).unwrap_or_default()
}

/// (name, [namespace,] key)
fn keyed_args(method: &str, args: &[Value]) -> Result<(String, String, String), Error> {
    match args.len() {
        2 => {
            let (name, key): (String, String) = from_args(args)?;
            Ok((name, String::new(), key))
        }
        3 => {
            let (name, namespace, key): (String, Option<String>, String) = from_args(args)?;
            Ok((name, namespace.unwrap_or_default(), key))
        }
        n => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("kube.{}() takes (name, [namespace,] key), got {} arguments", method, n),
        )),
    }
}

/// (name, [namespace])
fn named_args(args: &[Value]) -> Result<(String, String), Error> {
    let (name, namespace): (String, Option<String>) = from_args(args)?;
    Ok((name, namespace.unwrap_or_default()))
}

impl fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataProvider")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Object for DataProvider {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &minijinja::State,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        let accessor = Accessor::from_method(method).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownMethod,
                format!(
                    "kube object has no method '{}'. Available methods: {}",
                    method,
                    AVAILABLE_METHODS.join(", ")
                ),
            )
        })?;

        let result = match accessor {
            Accessor::ConfigMap => {
                let (name, namespace, key) = keyed_args(method, args)?;
                self.config_map(&name, &namespace, &key).map(Value::from)
            }
            Accessor::Secret => {
                let (name, namespace, key) = keyed_args(method, args)?;
                self.secret(&name, &namespace, &key).map(Value::from)
            }
            Accessor::SecretBinary => {
                let (name, namespace, key) = keyed_args(method, args)?;
                self.secret_binary(&name, &namespace, &key)
                    .map(Value::from_bytes)
            }
            Accessor::Env => {
                let (name,): (String,) = from_args(args)?;
                Ok(Value::from(self.env(&name)))
            }
            Accessor::Service => {
                let (name, namespace) = named_args(args)?;
                self.service(&name, &namespace)
                    .map(|svc| Value::from_serialize(&*svc))
            }
            Accessor::ServiceIp => {
                let (name, namespace) = named_args(args)?;
                self.service_ip(&name, &namespace).map(Value::from)
            }
            Accessor::Endpoints => {
                let (name, namespace) = named_args(args)?;
                self.endpoints(&name, &namespace)
                    .map(|ep| Value::from_serialize(&*ep))
            }
            Accessor::EndpointIps => {
                let (name, namespace) = named_args(args)?;
                self.endpoint_ips(&name, &namespace).map(Value::from)
            }
            Accessor::Network => {
                let (kind,): (String,) = from_args(args)?;
                self.network(&kind).map(Value::from)
            }
        };

        self.finish(accessor, method, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessor_aliases() {
        assert_eq!(Accessor::from_method("config_map"), Some(Accessor::ConfigMap));
        assert_eq!(Accessor::from_method("ConfigMap"), Some(Accessor::ConfigMap));
        assert_eq!(Accessor::from_method("ServiceIP"), Some(Accessor::ServiceIp));
        assert_eq!(Accessor::from_method("EndpointIPs"), Some(Accessor::EndpointIps));
        assert_eq!(Accessor::from_method("SecretBinary"), Some(Accessor::SecretBinary));
        assert_eq!(Accessor::from_method("serviceip"), None);
    }

    #[test]
    fn test_every_listed_method_dispatches() {
        for method in AVAILABLE_METHODS {
            assert!(Accessor::from_method(method).is_some(), "{}", method);
        }
    }

    #[test]
    fn test_placeholders_keep_their_type() {
        assert_eq!(Accessor::ConfigMap.placeholder().as_str(), Some(""));
        assert_eq!(
            Accessor::SecretBinary.placeholder().as_bytes(),
            Some(&b""[..])
        );
        assert_eq!(Accessor::EndpointIps.placeholder().len(), Some(0));
        let service = Accessor::Service.placeholder();
        assert_eq!(service.len(), Some(0));
        assert!(service.get_attr("spec").unwrap().is_undefined());
    }

    #[test]
    fn test_keyed_args_forms() {
        let two = [Value::from("app-cfg"), Value::from("LOG_LEVEL")];
        assert_eq!(
            keyed_args("config_map", &two).unwrap(),
            ("app-cfg".to_string(), String::new(), "LOG_LEVEL".to_string())
        );

        let three = [Value::from("app-cfg"), Value::from("ns1"), Value::from("LOG_LEVEL")];
        assert_eq!(
            keyed_args("config_map", &three).unwrap(),
            ("app-cfg".to_string(), "ns1".to_string(), "LOG_LEVEL".to_string())
        );

        assert!(keyed_args("config_map", &[Value::from("x")]).is_err());
    }

    #[test]
    fn test_named_args_optional_namespace() {
        assert_eq!(
            named_args(&[Value::from("web")]).unwrap(),
            ("web".to_string(), String::new())
        );
        assert_eq!(
            named_args(&[Value::from("web"), Value::from("ns1")]).unwrap(),
            ("web".to_string(), "ns1".to_string())
        );
    }
}
