//! CLI configuration file
//!
//! Looked up at `~/.config/kubetemplate/config.yaml` unless `--config` names
//! another file. A missing default file is not an error.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use kubetemplate_engine::{DiscoveryConfig, EngineConfig};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Templates handled by `watch`
    #[serde(default)]
    pub templates: Vec<TemplatePair>,

    /// Command run after an output file changed
    #[serde(default)]
    pub reload: Option<ReloadConfig>,
}

/// A template source and the file it renders to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePair {
    pub source: PathBuf,
    pub output: PathBuf,
}

impl FromStr for TemplatePair {
    type Err = String;

    /// Parse `SOURCE:OUTPUT`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((source, output)) if !source.is_empty() && !output.is_empty() => Ok(Self {
                source: PathBuf::from(source),
                output: PathBuf::from(output),
            }),
            _ => Err(format!("expected SOURCE:OUTPUT, got '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Program and arguments, not passed through a shell
    pub command: Vec<String>,
}

impl CliConfig {
    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kubetemplate").join("config.yaml"))
    }

    /// Load the configuration
    ///
    /// An explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CliError::Io {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::parse(&content).map_err(|e| CliError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }
}
