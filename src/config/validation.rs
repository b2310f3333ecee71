//! Configuration validation

use super::{Config, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::nat::{DEFAULT_IDLE_TIMEOUT_SECS, Ipv4Cidr};
use crate::telemetry::{is_known_format, is_known_level};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_addresses(config, &mut result);
    validate_ports(config, &mut result);
    validate_timers(config, &mut result);
    validate_networks(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn validate_addresses(config: &Config, result: &mut ValidationResult) {
    let addrs = &config.nat.external_addresses;
    if addrs.is_empty() {
        result.error("nat.external_addresses: at least one address required");
        return;
    }

    let mut seen = HashSet::new();
    for addr in addrs {
        if addr.is_unspecified() || addr.is_broadcast() || addr.is_multicast() {
            result.error(format!(
                "nat.external_addresses: {} is not a usable unicast address",
                addr
            ));
        }
        if !seen.insert(addr) {
            result.warn(format!("nat.external_addresses: {} listed twice", addr));
        }
    }
}

fn validate_ports(config: &Config, result: &mut ValidationResult) {
    let specs = &config.nat.external_ports;
    if specs.is_empty() {
        result.error("nat.external_ports: at least one port required");
        return;
    }

    let mut seen = HashSet::new();
    let mut overlapping = false;
    for spec in specs {
        let range = match spec.range() {
            Ok(range) => range,
            Err(e) => {
                result.error(format!("nat.external_ports: {}", e));
                continue;
            }
        };

        if *range.start() == 0 {
            result.error(format!("nat.external_ports: '{}' includes port 0", spec));
        }
        for port in range {
            overlapping |= !seen.insert(port);
        }
    }

    if overlapping {
        result.warn("nat.external_ports: overlapping entries, duplicates ignored");
    }

    let privileged = specs
        .iter()
        .filter_map(|spec| spec.range().ok())
        .any(|range| *range.start() != 0 && *range.start() < 1024);
    if privileged {
        result.warn("nat.external_ports: pool includes well-known ports below 1024");
    }
}

fn validate_timers(config: &Config, result: &mut ValidationResult) {
    let nat = &config.nat;

    match nat.idle_timeout {
        None => result.warn(format!(
            "nat.idle_timeout not specified, using default {}",
            DEFAULT_IDLE_TIMEOUT_SECS
        )),
        Some(0) => result.error("nat.idle_timeout must be positive"),
        Some(_) => {}
    }

    match nat.sweep_interval {
        None => result.warn(format!(
            "nat.sweep_interval not specified, using default {}",
            DEFAULT_SWEEP_INTERVAL_SECS
        )),
        Some(0) => result.error("nat.sweep_interval must be positive"),
        Some(_) => {}
    }

    let timeout = nat.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
    let interval = nat.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if timeout > 0 && interval > timeout {
        result.warn(format!(
            "nat.sweep_interval ({}) exceeds idle_timeout ({}), expired sessions hold sockets longer",
            interval, timeout
        ));
    }
}

fn validate_networks(config: &Config, result: &mut ValidationResult) {
    let nat = &config.nat;
    if nat.internal_networks.is_empty() {
        result.warn("nat.internal_networks: none defined, no flow will be translated");
        return;
    }

    for (i, network) in nat.internal_networks.iter().enumerate() {
        let cidr: Ipv4Cidr = match network.parse() {
            Ok(cidr) => cidr,
            Err(e) => {
                result.error(format!("nat.internal_networks[{}]: {}", i, e));
                continue;
            }
        };

        for addr in &nat.external_addresses {
            if cidr.contains(*addr) {
                result.error(format!(
                    "nat.internal_networks[{}]: {} contains external address {}",
                    i, cidr, addr
                ));
            }
        }
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    let Some(logging) = &config.logging else {
        return;
    };

    if !is_known_level(&logging.level) {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            logging.level
        ));
    }
    if !is_known_format(&logging.format) {
        result.warn(format!(
            "logging.format: unknown format '{}', using pretty",
            logging.format
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NatConfig, PortSpec};
    use crate::telemetry::LogConfig;
    use std::net::Ipv4Addr;

    fn make_config() -> Config {
        Config {
            nat: NatConfig {
                external_addresses: vec![Ipv4Addr::new(73, 1, 1, 1)],
                external_ports: vec![PortSpec::Range("1025-1027".into())],
                internal_networks: vec!["192.168.1.0/24".into()],
                idle_timeout: Some(15),
                sweep_interval: Some(5),
            },
            logging: None,
        }
    }

    #[test]
    fn test_valid_config() {
        let result = validate(&make_config());
        assert!(!result.has_errors());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_addresses() {
        let mut config = make_config();
        config.nat.external_addresses.clear();

        let result = validate(&config);
        assert!(result.has_errors());
        assert!(result.errors[0].contains("external_addresses"));
    }

    #[test]
    fn test_unusable_address() {
        let mut config = make_config();
        config.nat.external_addresses.push(Ipv4Addr::UNSPECIFIED);

        assert!(validate(&config).has_errors());
    }

    #[test]
    fn test_duplicate_address_warns() {
        let mut config = make_config();
        config.nat.external_addresses.push(Ipv4Addr::new(73, 1, 1, 1));

        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("listed twice")));
    }

    #[test]
    fn test_missing_ports() {
        let mut config = make_config();
        config.nat.external_ports.clear();

        assert!(validate(&config).has_errors());
    }

    #[test]
    fn test_bad_port_range() {
        let mut config = make_config();
        config.nat.external_ports = vec![PortSpec::Range("3000-2000".into())];

        let result = validate(&config);
        assert!(result.has_errors());
        assert!(result.errors[0].contains("start > end"));
    }

    #[test]
    fn test_port_zero() {
        let mut config = make_config();
        config.nat.external_ports = vec![PortSpec::Single(0)];

        assert!(validate(&config).has_errors());
    }

    #[test]
    fn test_overlapping_ports_warn() {
        let mut config = make_config();
        config.nat.external_ports.push(PortSpec::Single(1026));

        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("overlapping")));
    }

    #[test]
    fn test_timer_defaults_warn() {
        let mut config = make_config();
        config.nat.idle_timeout = None;
        config.nat.sweep_interval = None;

        let result = validate(&config);
        assert!(!result.has_errors());
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = make_config();
        config.nat.idle_timeout = Some(0);

        assert!(validate(&config).has_errors());
    }

    #[test]
    fn test_sweep_slower_than_timeout_warns() {
        let mut config = make_config();
        config.nat.sweep_interval = Some(60);

        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("exceeds")));
    }

    #[test]
    fn test_bad_network() {
        let mut config = make_config();
        config.nat.internal_networks = vec!["192.168.1.0".into()];

        assert!(validate(&config).has_errors());
    }

    #[test]
    fn test_external_inside_internal_network() {
        let mut config = make_config();
        config.nat.internal_networks = vec!["73.1.0.0/16".into()];

        let result = validate(&config);
        assert!(result.has_errors());
        assert!(result.errors[0].contains("contains external address"));
    }

    #[test]
    fn test_unknown_logging_warns() {
        let mut config = make_config();
        config.logging = Some(LogConfig {
            level: "loud".into(),
            format: "xml".into(),
        });

        let result = validate(&config);
        assert!(!result.has_errors());
        assert_eq!(result.warnings.len(), 2);
    }
}
