//! Engine and discovery configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Namespace used when a template passes an empty or missing namespace
    #[serde(default)]
    pub default_namespace: Option<String>,

    /// Interval between forced re-listings of every watch (0 disables)
    #[serde(default = "default_resync", with = "humantime_serde")]
    pub resync: Duration,

    /// How long a render waits for namespace caches to complete their first listing
    #[serde(default = "default_sync_timeout", with = "humantime_serde")]
    pub sync_timeout: Duration,

    /// Fail renders on undefined values
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_namespace: None,
            resync: default_resync(),
            sync_timeout: default_sync_timeout(),
            strict: true,
        }
    }
}

/// Network identity discovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    /// Fixed hostname, bypassing discovery
    #[serde(default)]
    pub hostname: Option<String>,

    /// Fixed private IPv4 address
    #[serde(default)]
    pub private_ipv4: Option<String>,

    /// Fixed public IPv4 address
    #[serde(default)]
    pub public_ipv4: Option<String>,

    /// Fixed public IPv6 address
    #[serde(default)]
    pub public_ipv6: Option<String>,

    /// Ask an external echo service for the public addresses at startup
    #[serde(default)]
    pub probe_public: bool,

    #[serde(default = "default_ipv4_url")]
    pub public_ipv4_url: String,

    #[serde(default = "default_ipv6_url")]
    pub public_ipv6_url: String,

    /// Timeout for each public address probe
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            private_ipv4: None,
            public_ipv4: None,
            public_ipv6: None,
            probe_public: false,
            public_ipv4_url: default_ipv4_url(),
            public_ipv6_url: default_ipv6_url(),
            timeout: default_probe_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_resync() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_ipv4_url() -> String {
    "https://api.ipify.org".to_string()
}

fn default_ipv6_url() -> String {
    "https://api6.ipify.org".to_string()
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}
