//! Network identity discovery
//!
//! Templates read the pod's hostname and addresses through `kube.network(kind)`.
//! A [`Discoverer`] answers those lookups; [`LocalDiscoverer`] inspects the
//! running host and [`StaticDiscoverer`] serves fixed values.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DiscoveryConfig;
use crate::error::LookupError;

/// One of the network facts a template can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkKind {
    Hostname,
    PrivateIpv4,
    PublicIpv4,
    PublicIpv6,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hostname => "hostname",
            Self::PrivateIpv4 => "privatev4",
            Self::PublicIpv4 => "publicv4",
            Self::PublicIpv6 => "publicv6",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkKind {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hostname" => Ok(Self::Hostname),
            "privatev4" | "privateipv4" => Ok(Self::PrivateIpv4),
            "publicv4" | "publicipv4" => Ok(Self::PublicIpv4),
            "publicv6" | "publicipv6" => Ok(Self::PublicIpv6),
            _ => Err(LookupError::UnrecognizedNetworkKind(s.to_string())),
        }
    }
}

/// Discovery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("{0} is not available on this host")]
    Unavailable(NetworkKind),

    #[error("failed to determine {kind}: {message}")]
    Failed { kind: NetworkKind, message: String },

    #[error("invalid {kind} override '{value}'")]
    InvalidOverride { kind: NetworkKind, value: String },
}

/// Source of the local network identity
pub trait Discoverer: fmt::Debug + Send + Sync {
    fn hostname(&self) -> Result<String, DiscoveryError>;

    fn private_ipv4(&self) -> Result<Ipv4Addr, DiscoveryError>;

    fn public_ipv4(&self) -> Result<Ipv4Addr, DiscoveryError>;

    fn public_ipv6(&self) -> Result<Ipv6Addr, DiscoveryError>;

    /// Answer a lookup by kind, formatted for template output
    fn lookup(&self, kind: NetworkKind) -> Result<String, DiscoveryError> {
        match kind {
            NetworkKind::Hostname => self.hostname(),
            NetworkKind::PrivateIpv4 => self.private_ipv4().map(|ip| ip.to_string()),
            NetworkKind::PublicIpv4 => self.public_ipv4().map(|ip| ip.to_string()),
            NetworkKind::PublicIpv6 => self.public_ipv6().map(|ip| ip.to_string()),
        }
    }
}

/// Discoverer with fixed answers; unset facts are unavailable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticDiscoverer {
    pub hostname: Option<String>,
    pub private_ipv4: Option<Ipv4Addr>,
    pub public_ipv4: Option<Ipv4Addr>,
    pub public_ipv6: Option<Ipv6Addr>,
}

impl StaticDiscoverer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_private_ipv4(mut self, ip: Ipv4Addr) -> Self {
        self.private_ipv4 = Some(ip);
        self
    }

    pub fn with_public_ipv4(mut self, ip: Ipv4Addr) -> Self {
        self.public_ipv4 = Some(ip);
        self
    }

    pub fn with_public_ipv6(mut self, ip: Ipv6Addr) -> Self {
        self.public_ipv6 = Some(ip);
        self
    }

    /// Take the fixed overrides of a discovery configuration
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        Ok(Self {
            hostname: config.hostname.clone(),
            private_ipv4: parse_override(config.private_ipv4.as_deref(), NetworkKind::PrivateIpv4)?,
            public_ipv4: parse_override(config.public_ipv4.as_deref(), NetworkKind::PublicIpv4)?,
            public_ipv6: parse_override(config.public_ipv6.as_deref(), NetworkKind::PublicIpv6)?,
        })
    }
}

fn parse_override<T: FromStr>(
    value: Option<&str>,
    kind: NetworkKind,
) -> Result<Option<T>, DiscoveryError> {
    value
        .map(|v| {
            v.trim().parse().map_err(|_| DiscoveryError::InvalidOverride {
                kind,
                value: v.to_string(),
            })
        })
        .transpose()
}

impl Discoverer for StaticDiscoverer {
    fn hostname(&self) -> Result<String, DiscoveryError> {
        self.hostname
            .clone()
            .ok_or(DiscoveryError::Unavailable(NetworkKind::Hostname))
    }

    fn private_ipv4(&self) -> Result<Ipv4Addr, DiscoveryError> {
        self.private_ipv4
            .ok_or(DiscoveryError::Unavailable(NetworkKind::PrivateIpv4))
    }

    fn public_ipv4(&self) -> Result<Ipv4Addr, DiscoveryError> {
        self.public_ipv4
            .ok_or(DiscoveryError::Unavailable(NetworkKind::PublicIpv4))
    }

    fn public_ipv6(&self) -> Result<Ipv6Addr, DiscoveryError> {
        self.public_ipv6
            .ok_or(DiscoveryError::Unavailable(NetworkKind::PublicIpv6))
    }
}

const KERNEL_HOSTNAME: &str = "/proc/sys/kernel/hostname";

/// Discoverer that inspects the running host
///
/// Overrides from the configuration win. Hostname and private address are
/// read on every lookup; public addresses are probed once, in [`probe`].
///
/// [`probe`]: LocalDiscoverer::probe
#[derive(Debug, Clone)]
pub struct LocalDiscoverer {
    overrides: StaticDiscoverer,
    probed_ipv4: Option<Ipv4Addr>,
    probed_ipv6: Option<Ipv6Addr>,
}

impl LocalDiscoverer {
    /// Build from configuration, probing public addresses if enabled
    ///
    /// A failed probe is logged and leaves that address unavailable.
    pub async fn probe(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let overrides = StaticDiscoverer::from_config(config)?;
        let mut discoverer = Self {
            overrides,
            probed_ipv4: None,
            probed_ipv6: None,
        };

        let want_v4 = discoverer.overrides.public_ipv4.is_none();
        let want_v6 = discoverer.overrides.public_ipv6.is_none();
        if !config.probe_public || !(want_v4 || want_v6) {
            return Ok(discoverer);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DiscoveryError::Failed {
                kind: NetworkKind::PublicIpv4,
                message: format!("failed to create HTTP client: {}", e),
            })?;

        if want_v4 {
            match fetch_address(&client, &config.public_ipv4_url, NetworkKind::PublicIpv4).await {
                Ok(IpAddr::V4(ip)) => discoverer.probed_ipv4 = Some(ip),
                Ok(other) => warn!(address = %other, "IPv4 probe returned a non-IPv4 address"),
                Err(e) => warn!(error = %e, "public IPv4 probe failed"),
            }
        }
        if want_v6 {
            match fetch_address(&client, &config.public_ipv6_url, NetworkKind::PublicIpv6).await {
                Ok(IpAddr::V6(ip)) => discoverer.probed_ipv6 = Some(ip),
                Ok(other) => warn!(address = %other, "IPv6 probe returned a non-IPv6 address"),
                Err(e) => warn!(error = %e, "public IPv6 probe failed"),
            }
        }

        Ok(discoverer)
    }

    /// Local discovery with no overrides and no public probes
    pub fn without_probes() -> Self {
        Self {
            overrides: StaticDiscoverer::default(),
            probed_ipv4: None,
            probed_ipv6: None,
        }
    }
}

async fn fetch_address(
    client: &reqwest::Client,
    url: &str,
    kind: NetworkKind,
) -> Result<IpAddr, DiscoveryError> {
    let failed = |message: String| DiscoveryError::Failed { kind, message };

    let body = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| failed(format!("request to {} failed: {}", url, e)))?
        .text()
        .await
        .map_err(|e| failed(format!("reading response from {} failed: {}", url, e)))?;

    let address = body
        .trim()
        .parse()
        .map_err(|_| failed(format!("{} returned '{}'", url, body.trim())))?;
    debug!(%kind, %address, "probed public address");
    Ok(address)
}

impl Discoverer for LocalDiscoverer {
    fn hostname(&self) -> Result<String, DiscoveryError> {
        if let Some(hostname) = &self.overrides.hostname {
            return Ok(hostname.clone());
        }

        std::fs::read_to_string(KERNEL_HOSTNAME)
            .ok()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .ok_or(DiscoveryError::Unavailable(NetworkKind::Hostname))
    }

    fn private_ipv4(&self) -> Result<Ipv4Addr, DiscoveryError> {
        if let Some(ip) = self.overrides.private_ipv4 {
            return Ok(ip);
        }

        if let Some(ip) = std::env::var("POD_IP").ok().and_then(|v| v.parse().ok()) {
            return Ok(ip);
        }

        // connecting a UDP socket sends nothing but selects the outbound interface
        let failed = |e: std::io::Error| DiscoveryError::Failed {
            kind: NetworkKind::PrivateIpv4,
            message: e.to_string(),
        };
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(failed)?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 53)).map_err(failed)?;
        match socket.local_addr().map_err(failed)?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
            _ => Err(DiscoveryError::Unavailable(NetworkKind::PrivateIpv4)),
        }
    }

    fn public_ipv4(&self) -> Result<Ipv4Addr, DiscoveryError> {
        self.overrides
            .public_ipv4
            .or(self.probed_ipv4)
            .ok_or(DiscoveryError::Unavailable(NetworkKind::PublicIpv4))
    }

    fn public_ipv6(&self) -> Result<Ipv6Addr, DiscoveryError> {
        self.overrides
            .public_ipv6
            .or(self.probed_ipv6)
            .ok_or(DiscoveryError::Unavailable(NetworkKind::PublicIpv6))
    }
}
