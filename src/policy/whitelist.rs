//! Whitelist entries parsed once at startup and shared read-only.

use ipnetwork::Ipv4Network;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::port::PortSpec;
use crate::config::{ConfigError, WhitelistConfig};

/// An approved `protocol` + `network` + ports combination for ingress rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallWhitelistEntry {
    pub protocol: String,
    pub network: Ipv4Network,
    pub ports: Vec<PortSpec>,
}

impl FirewallWhitelistEntry {
    /// `self.network` contains (or equals) `range`.
    pub fn is_supernet_of(&self, range: &Ipv4Network) -> bool {
        self.network.prefix() <= range.prefix() && self.network.contains(range.network())
    }
}

impl FromStr for FirewallWhitelistEntry {
    type Err = ConfigError;

    /// Format: `protocol:CIDR` (all ports) or `protocol:CIDR:ports`, where
    /// `ports` is a comma-separated list of numbers and `lo-hi` ranges.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidWhitelistEntry {
            entry: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.trim().split(':').collect();
        let (protocol, cidr, ports) = match parts.as_slice() {
            [protocol, cidr] => (*protocol, *cidr, None),
            [protocol, cidr, ports] => (*protocol, *cidr, Some(*ports)),
            _ => return Err(invalid("expected protocol:CIDR[:ports]".to_string())),
        };

        let protocol = protocol.trim();
        if protocol.is_empty() {
            return Err(invalid("empty protocol".to_string()));
        }

        let network = Ipv4Network::from_str(cidr.trim())
            .map_err(|e| invalid(format!("invalid IPv4 CIDR '{}': {}", cidr, e)))?;

        let ports = match ports {
            None => vec![PortSpec::ALL],
            Some(list) => list
                .split(',')
                .map(|p| p.parse::<PortSpec>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| invalid(e.to_string()))?,
        };

        Ok(Self {
            protocol: protocol.to_string(),
            network,
            ports,
        })
    }
}

impl fmt::Display for FirewallWhitelistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports: Vec<String> = self.ports.iter().map(|p| p.to_string()).collect();
        write!(f, "{}:{}:{}", self.protocol, self.network, ports.join(","))
    }
}

/// Process-wide whitelist. Immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct WhitelistStore {
    pub firewall: Vec<FirewallWhitelistEntry>,
    pub buckets: BTreeSet<String>,
}

impl WhitelistStore {
    /// Parse every configured entry. A single bad entry rejects the whole
    /// store so the service never runs with a silently truncated whitelist.
    pub fn from_config(config: &WhitelistConfig) -> Result<Self, ConfigError> {
        let firewall = config
            .firewall
            .iter()
            .filter(|e| !e.trim().is_empty())
            .map(|e| e.parse())
            .collect::<Result<Vec<_>, _>>()?;

        let buckets = config
            .buckets
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self { firewall, buckets })
    }

    pub fn is_bucket_whitelisted(&self, bucket: &str) -> bool {
        self.buckets.contains(bucket)
    }
}
