//! Two-phase template engine
//!
//! [`Engine::learn`] runs a template as a dry run: every accessor call
//! registers the resource it reads with the monitors of its namespace,
//! starting the namespace's watches on first use. [`Engine::render`] runs
//! the template against the live caches. [`Engine::wait`] returns when any
//! learned dependency changes materially.
//!
//! Learning is exclusive across the engine; renders share the lock and may
//! run concurrently with each other.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::try_join_all;
use kubetemplate_kube::{ChangeSignal, ControlPlane, Dependency, KubeError, NamespaceController};
use minijinja::{Environment, UndefinedBehavior, Value};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::discovery::{Discoverer, LocalDiscoverer};
use crate::error::{EngineError, LookupError, Result, TemplateError, lookup_source};
use crate::filters;
use crate::provider::{self, DataProvider, Mode};

/// A named template source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    source: String,
}

impl Template {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Load a template file, named after its path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Template engine builder
pub struct EngineBuilder {
    control_plane: Arc<dyn ControlPlane>,
    discoverer: Option<Arc<dyn Discoverer>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(control_plane: impl ControlPlane) -> Self {
        Self::with_control_plane(Arc::new(control_plane))
    }

    pub fn with_control_plane(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            discoverer: None,
            config: EngineConfig::default(),
        }
    }

    /// Network identity source (defaults to local discovery without public probes)
    pub fn discoverer(mut self, discoverer: impl Discoverer + 'static) -> Self {
        self.discoverer = Some(Arc::new(discoverer));
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set strict mode (fail renders on undefined values)
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    pub fn resync(mut self, resync: Duration) -> Self {
        self.config.resync = resync;
        self
    }

    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.config.sync_timeout = timeout;
        self
    }

    pub fn default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.default_namespace = Some(namespace.into());
        self
    }

    /// Build the engine; must be called within a Tokio runtime
    pub fn build(self) -> Result<Engine> {
        let runtime = Handle::try_current()
            .map_err(|e| EngineError::Internal(format!("no Tokio runtime: {}", e)))?;
        let discoverer: Arc<dyn Discoverer> = match self.discoverer {
            Some(discoverer) => discoverer,
            None => Arc::new(LocalDiscoverer::without_probes()),
        };

        let shared = Shared {
            control_plane: self.control_plane,
            discoverer,
            config: self.config,
            namespaces: Mutex::new(BTreeMap::new()),
            changes: ChangeSignal::new(),
            stop: CancellationToken::new(),
            failure: Arc::new(Mutex::new(None)),
            runtime,
        };

        Ok(Engine {
            shared: Arc::new(shared),
            learning: Arc::new(RwLock::new(())),
            closed: AtomicBool::new(false),
        })
    }
}

/// State reachable from template accessors
pub(crate) struct Shared {
    control_plane: Arc<dyn ControlPlane>,
    discoverer: Arc<dyn Discoverer>,
    config: EngineConfig,
    namespaces: Mutex<BTreeMap<String, Arc<NamespaceController>>>,
    changes: ChangeSignal,
    stop: CancellationToken,
    failure: Arc<Mutex<Option<Arc<KubeError>>>>,
    runtime: Handle,
}

impl Shared {
    pub(crate) fn namespace(&self, name: &str) -> Option<Arc<NamespaceController>> {
        self.namespaces.lock().get(name).cloned()
    }

    /// Get a namespace controller, creating and starting it on first reference
    pub(crate) fn namespace_or_create(&self, name: &str) -> Arc<NamespaceController> {
        let mut namespaces = self.namespaces.lock();
        if let Some(controller) = namespaces.get(name) {
            return controller.clone();
        }

        info!(namespace = name, "monitoring namespace");
        let controller = Arc::new(NamespaceController::new(
            name,
            self.control_plane.clone(),
            self.config.resync,
            self.changes.clone(),
        ));
        namespaces.insert(name.to_string(), controller.clone());

        let run = controller.clone().run(self.stop.clone());
        let failure = self.failure.clone();
        let changes = self.changes.clone();
        let namespace = name.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = run.await {
                error!(namespace = %namespace, error = %e, "namespace monitoring stopped");
                {
                    let mut slot = failure.lock();
                    if slot.is_none() {
                        *slot = Some(Arc::new(e));
                    }
                }
                changes.emit();
            }
        });

        controller
    }

    pub(crate) fn default_namespace(&self) -> Option<&str> {
        self.config
            .default_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
    }

    pub(crate) fn discoverer(&self) -> &dyn Discoverer {
        self.discoverer.as_ref()
    }

    fn recorded_failure(&self) -> Option<Arc<KubeError>> {
        self.failure.lock().clone()
    }

    /// Create a configured MiniJinja environment for one pass
    fn create_environment<'source>(self: &Arc<Self>, mode: Mode) -> Environment<'source> {
        let mut env = Environment::new();

        env.set_undefined_behavior(match mode {
            Mode::Learning => UndefinedBehavior::Chainable,
            Mode::Rendering if self.config.strict => UndefinedBehavior::Strict,
            Mode::Rendering => UndefinedBehavior::Lenient,
        });

        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("quote", filters::quote);

        env.add_function("env", provider::env_function);
        env.add_global("kube", Value::from_object(DataProvider::new(self.clone(), mode)));

        env
    }

    /// Execute a template synchronously in the given mode
    fn execute(self: &Arc<Self>, template: &Template, mode: Mode) -> Result<String> {
        let env = self.create_environment(mode);
        let tmpl = env
            .template_from_named_str(&template.name, &template.source)
            .map_err(|e| template_error(e, template))?;
        tmpl.render(()).map_err(|e| template_error(e, template))
    }
}

fn template_error(err: minijinja::Error, template: &Template) -> EngineError {
    match lookup_source(&err) {
        Some(lookup) => EngineError::Lookup(lookup),
        None => TemplateError::from_minijinja(err, &template.name, &template.source).into(),
    }
}

/// The template engine
pub struct Engine {
    shared: Arc<Shared>,
    learning: Arc<RwLock<()>>,
    closed: AtomicBool,
}

impl Engine {
    /// Create a builder around a control plane
    pub fn builder(control_plane: impl ControlPlane) -> EngineBuilder {
        EngineBuilder::new(control_plane)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Dry-run a template, registering every resource it reads
    ///
    /// Lookups that fail while learning do not fail the pass; the dependency
    /// is registered either way. Repeated calls only ever add dependencies.
    pub async fn learn(&self, template: &Template) -> Result<()> {
        self.ensure_open()?;
        let guard = self.learning.clone().write_owned().await;

        let shared = self.shared.clone();
        let tmpl = template.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            shared.execute(&tmpl, Mode::Learning)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("learn task failed: {}", e)))??;

        info!(
            template = template.name(),
            namespaces = self.shared.namespaces.lock().len(),
            "learned template"
        );
        Ok(())
    }

    /// Render a template from the live caches
    pub async fn render(&self, template: &Template) -> Result<String> {
        self.ensure_open()?;
        let guard = self.learning.clone().read_owned().await;
        self.wait_synced().await?;

        let shared = self.shared.clone();
        let tmpl = template.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            shared.execute(&tmpl, Mode::Rendering)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("render task failed: {}", e)))??;

        debug!(template = template.name(), bytes = rendered.len(), "rendered template");
        Ok(rendered)
    }

    /// Render a template into a writer
    pub async fn render_to(&self, template: &Template, mut out: impl std::io::Write) -> Result<()> {
        let rendered = self.render(template).await?;
        out.write_all(rendered.as_bytes())?;
        Ok(())
    }

    /// Wait until a learned dependency changes or `cancel` fires
    ///
    /// Changes raised while nobody waits are kept (at most one) and returned
    /// by the next call.
    pub async fn wait(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.shared.changes.changed() => {}
        }
    }

    /// Stop every namespace watch; calling it again has no effect
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("closing engine");
            self.shared.stop.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The first watch failure of any namespace, if one occurred
    pub fn check_health(&self) -> Result<()> {
        match self.shared.recorded_failure() {
            Some(failure) => Err(EngineError::WatchFailure(failure)),
            None => Ok(()),
        }
    }

    /// Every learned dependency, ordered by namespace, kind and name
    pub fn dependencies(&self) -> Vec<Dependency> {
        let controllers: Vec<_> = self.shared.namespaces.lock().values().cloned().collect();
        let mut deps: Vec<Dependency> = controllers.iter().flat_map(|c| c.dependencies()).collect();
        deps.sort();
        deps
    }

    /// Names of the monitored namespaces, sorted
    pub fn namespaces(&self) -> Vec<String> {
        self.shared.namespaces.lock().keys().cloned().collect()
    }

    pub fn controller(&self, namespace: &str) -> Option<Arc<NamespaceController>> {
        self.shared.namespace(namespace)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    /// Wait for every namespace cache to finish its first listing
    async fn wait_synced(&self) -> Result<()> {
        let controllers: Vec<_> = self.shared.namespaces.lock().values().cloned().collect();
        let timeout = self.shared.config.sync_timeout;

        try_join_all(controllers.iter().map(|controller| async move {
            match tokio::time::timeout(timeout, controller.wait_synced()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(EngineError::WatchFailure(
                    self.shared.recorded_failure().unwrap_or_else(|| Arc::new(e)),
                )),
                Err(_) => Err(EngineError::Lookup(LookupError::CacheNotSynced {
                    namespace: controller.name().to_string(),
                    timeout,
                })),
            }
        }))
        .await?;
        Ok(())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.shared.config)
            .field("namespaces", &self.namespaces())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}
