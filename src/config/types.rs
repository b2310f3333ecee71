//! Configuration types

use crate::nat::{Boundary, DEFAULT_IDLE_TIMEOUT_SECS, Ipv4Cidr, SocketPool};
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Default sweep interval in seconds
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub nat: NatConfig,
    #[serde(default)]
    pub logging: Option<LogConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatConfig {
    #[serde(default)]
    pub external_addresses: Vec<Ipv4Addr>,
    #[serde(default)]
    pub external_ports: Vec<PortSpec>,
    #[serde(default)]
    pub internal_networks: Vec<String>,
    /// Seconds of inactivity before a remote port record expires
    pub idle_timeout: Option<u64>,
    /// Seconds between expiry sweeps
    pub sweep_interval: Option<u64>,
}

/// A single port (`1025`) or an inclusive range (`"2000-2010"`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PortSpec {
    Single(u16),
    Range(String),
}

impl PortSpec {
    pub fn range(&self) -> Result<RangeInclusive<u16>> {
        match self {
            PortSpec::Single(port) => Ok(*port..=*port),
            PortSpec::Range(s) => parse_port_range(s),
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Single(port) => write!(f, "{}", port),
            PortSpec::Range(s) => write!(f, "{}", s),
        }
    }
}

fn parse_port_range(s: &str) -> Result<RangeInclusive<u16>> {
    let parse = |p: &str| -> Result<u16> {
        p.trim()
            .parse()
            .map_err(|_| Error::Parse(format!("invalid port '{}'", p.trim())))
    };

    match s.split_once('-') {
        Some((start, end)) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(Error::Parse(format!(
                    "invalid port range '{}': start > end",
                    s
                )));
            }
            Ok(start..=end)
        }
        None => {
            let port = parse(s)?;
            Ok(port..=port)
        }
    }
}

/// Expand port specs into a set of ports
pub fn expand_ports(specs: &[PortSpec]) -> Result<BTreeSet<u16>> {
    let mut ports = BTreeSet::new();
    for spec in specs {
        ports.extend(spec.range()?);
    }
    Ok(ports)
}

/// Collapse a port set into the shortest list of ranges
fn compress_ports(ports: &BTreeSet<u16>) -> Vec<String> {
    let mut ranges: Vec<(u16, u16)> = Vec::new();
    for &port in ports {
        match ranges.last_mut() {
            Some((_, end)) if u32::from(*end) + 1 == u32::from(port) => *end = port,
            _ => ranges.push((port, port)),
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{}-{}", start, end)
            }
        })
        .collect()
}

// ============================================================================
// Lock file types (generated, includes all defaults)
// ============================================================================

/// Generated lock file with all defaults filled in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLock {
    pub generated_at: String,
    pub nat: NatLock,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatLock {
    pub external_addresses: Vec<Ipv4Addr>,
    pub external_ports: Vec<String>,
    pub internal_networks: Vec<String>,
    pub idle_timeout: u64,
    pub sweep_interval: u64,
    pub pool_size: usize,
}

impl ConfigLock {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(ConfigLock {
            generated_at: chrono::Utc::now().to_rfc3339(),
            nat: NatLock::from_config(&config.nat)?,
            logging: config.logging.clone().unwrap_or_default(),
        })
    }
}

impl NatLock {
    pub fn from_config(nat: &NatConfig) -> Result<Self> {
        let addrs: BTreeSet<Ipv4Addr> = nat.external_addresses.iter().copied().collect();
        let ports = expand_ports(&nat.external_ports)?;

        let internal_networks = nat
            .internal_networks
            .iter()
            .map(|s| s.parse::<Ipv4Cidr>().map(|cidr| cidr.to_string()))
            .collect::<Result<Vec<_>>>()?;

        Ok(NatLock {
            pool_size: addrs.len() * ports.len(),
            external_addresses: addrs.into_iter().collect(),
            external_ports: compress_ports(&ports),
            internal_networks,
            idle_timeout: nat.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            sweep_interval: nat.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        })
    }

    /// Resolve the lock into the translator's startup inputs
    pub fn settings(&self) -> Result<NatSettings> {
        let external_ports: BTreeSet<u16> = self
            .external_ports
            .iter()
            .map(|s| parse_port_range(s))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        let internal_networks = self
            .internal_networks
            .iter()
            .map(|s| s.parse::<Ipv4Cidr>())
            .collect::<Result<Vec<_>>>()?;

        if self.idle_timeout == 0 {
            return Err(Error::Config("nat.idle_timeout must be positive".into()));
        }
        if self.sweep_interval == 0 {
            return Err(Error::Config("nat.sweep_interval must be positive".into()));
        }

        Ok(NatSettings {
            external_addresses: self.external_addresses.iter().copied().collect(),
            external_ports,
            internal_networks,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            sweep_interval: Duration::from_secs(self.sweep_interval),
        })
    }
}

/// Validated, defaulted startup inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatSettings {
    pub external_addresses: BTreeSet<Ipv4Addr>,
    pub external_ports: BTreeSet<u16>,
    pub internal_networks: Vec<Ipv4Cidr>,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl NatSettings {
    pub fn pool(&self) -> SocketPool {
        SocketPool::new(
            self.external_addresses.iter().copied(),
            self.external_ports.iter().copied(),
        )
    }

    pub fn boundary(&self) -> Boundary {
        Boundary::new(
            self.internal_networks.iter().copied(),
            self.external_addresses.iter().copied(),
        )
    }
}
