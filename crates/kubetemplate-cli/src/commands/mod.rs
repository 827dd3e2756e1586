//! CLI commands

pub mod deps;
pub mod render;
pub mod watch;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kubetemplate_engine::{Engine, KubeControlPlane, LocalDiscoverer, Template};
use tracing::debug;

use crate::config::CliConfig;
use crate::error::{CliError, Result};

/// Flags shared by every command
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub namespace: Option<String>,
    pub resync: Option<Duration>,
}

impl GlobalOptions {
    /// Load the configuration file and apply command-line overrides
    pub fn load_config(&self) -> Result<CliConfig> {
        let mut config = CliConfig::load(self.config.as_deref())?;
        if let Some(namespace) = self.namespace.as_ref().filter(|ns| !ns.is_empty()) {
            config.engine.default_namespace = Some(namespace.clone());
        }
        if let Some(resync) = self.resync {
            config.engine.resync = resync;
        }
        Ok(config)
    }
}

/// Connect to the cluster and build an engine
pub async fn connect(config: &CliConfig) -> Result<Engine> {
    let control_plane = KubeControlPlane::try_default().await?;
    let discoverer = LocalDiscoverer::probe(&config.discovery)
        .await
        .map_err(|e| CliError::config(e.to_string()))?;

    debug!(config = ?config.engine, "connected to cluster");
    let engine = Engine::builder(control_plane)
        .config(config.engine.clone())
        .discoverer(discoverer)
        .build()?;
    Ok(engine)
}

pub fn load_template(path: &Path) -> Result<Template> {
    Template::from_file(path).map_err(|e| CliError::Io {
        message: format!("{}: {}", path.display(), e),
    })
}

/// Replace `path` with `contents` without exposing a partial file
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| CliError::Io {
        message: format!("{}: {}", path.display(), e.error),
    })?;
    Ok(())
}
