//! Ingress rule evaluation against the firewall whitelist.

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use tracing::{debug, info};

use super::ViolationResult;
use super::port::{PortSpec, all_covered};
use super::whitelist::FirewallWhitelistEntry;

/// The all-addresses range. Always public, whatever the private-range
/// table says about its endpoints.
pub const ALL_ADDRESSES: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Ingress,
    Egress,
}

/// One entry of a rule's `allowed` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedRule {
    #[serde(rename = "IPProtocol")]
    pub protocol: String,
    /// Empty means every port.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSpec>,
}

/// Current state of a firewall rule, in the Compute API's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallSnapshot {
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub allowed: Vec<AllowedRule>,
    #[serde(default)]
    pub source_ranges: Vec<String>,
}

impl FirewallSnapshot {
    /// protocol -> granted ports. Duplicate protocols are merged.
    pub fn proto_ports(&self) -> BTreeMap<String, Vec<PortSpec>> {
        let mut map: BTreeMap<String, Vec<PortSpec>> = BTreeMap::new();
        for rule in &self.allowed {
            let ports = if rule.ports.is_empty() {
                vec![PortSpec::ALL]
            } else {
                rule.ports.clone()
            };
            map.entry(rule.protocol.clone()).or_default().extend(ports);
        }
        map
    }
}

/// Reserved IPv4 blocks treated as non-internet-routable.
const PRIVATE_BLOCKS: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 29),
    (Ipv4Addr::new(192, 0, 0, 170), 31),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
    (Ipv4Addr::new(255, 255, 255, 255), 32),
];

/// Unique-local, link-local and loopback.
const PRIVATE_V6_BLOCKS: &[(Ipv6Addr, u8)] = &[
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::LOCALHOST, 128),
];

/// A network is private when a single reserved block contains all of it.
pub fn is_private_network(net: &Ipv4Network) -> bool {
    PRIVATE_BLOCKS.iter().any(|(base, prefix)| {
        Ipv4Network::new(*base, *prefix)
            .map(|block| block.prefix() <= net.prefix() && block.contains(net.network()))
            .unwrap_or(false)
    })
}

pub fn is_private_v6_network(net: &Ipv6Network) -> bool {
    PRIVATE_V6_BLOCKS.iter().any(|(base, prefix)| {
        Ipv6Network::new(*base, *prefix)
            .map(|block| block.prefix() <= net.prefix() && block.contains(net.network()))
            .unwrap_or(false)
    })
}

/// Whether `range` must be checked against the whitelist.
pub fn is_public_range(raw: &str, net: &Ipv4Network) -> bool {
    raw.trim() == ALL_ADDRESSES || !is_private_network(net)
}

fn entry_permits(
    entry: &FirewallWhitelistEntry,
    range: &Ipv4Network,
    proto_ports: &BTreeMap<String, Vec<PortSpec>>,
) -> bool {
    match proto_ports.get(&entry.protocol) {
        Some(granted) => entry.is_supernet_of(range) && all_covered(&entry.ports, granted),
        None => false,
    }
}

/// Evaluate an ingress rule.
///
/// Egress rules are out of policy scope and always compliant. Private
/// source ranges are skipped. Each public range needs one whitelist entry
/// whose network covers it and whose ports cover everything granted for
/// that entry's protocol. The scan stops at the first uncovered range.
///
/// The whitelist is IPv4 only, so a public IPv6 range can never be covered
/// and is reported as a violation. Private IPv6 ranges are skipped like
/// their IPv4 counterparts. A range that is not a network at all is a
/// violation.
pub fn evaluate(
    snapshot: &FirewallSnapshot,
    whitelist: &[FirewallWhitelistEntry],
) -> ViolationResult {
    if snapshot.direction != Direction::Ingress {
        debug!("Firewall rule {} is not ingress, skipping", snapshot.name);
        return ViolationResult::compliant("only ingress rules are checked");
    }

    let proto_ports = snapshot.proto_ports();

    for raw in &snapshot.source_ranges {
        let net = match IpNetwork::from_str(raw.trim()) {
            Ok(IpNetwork::V4(net)) => net,
            Ok(IpNetwork::V6(net)) if is_private_v6_network(&net) => {
                debug!("Private IP range {}, skipping", raw);
                continue;
            }
            Ok(IpNetwork::V6(_)) => {
                info!("Invalid IP range {} for the protocols and ports", raw);
                return ViolationResult::firewall_violation(
                    raw,
                    format!("public IPv6 source range {} cannot be whitelisted", raw),
                );
            }
            Err(_) => {
                info!("Invalid IP range {} for the protocols and ports", raw);
                return ViolationResult::firewall_violation(
                    raw,
                    format!("source range {} is not an IP network", raw),
                );
            }
        };

        if !is_public_range(raw, &net) {
            debug!("Private IP range {}, skipping", raw);
            continue;
        }

        if whitelist
            .iter()
            .any(|entry| entry_permits(entry, &net, &proto_ports))
        {
            info!("Valid IP range {} for the protocols and ports", raw);
        } else {
            info!("Invalid IP range {} for the protocols and ports", raw);
            return ViolationResult::firewall_violation(
                raw,
                format!(
                    "public source range {} is not covered by any whitelist entry",
                    raw
                ),
            );
        }
    }

    ViolationResult::compliant("every public source range is whitelisted")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(direction: Direction, allowed: &[(&str, &[&str])], ranges: &[&str]) -> FirewallSnapshot {
        FirewallSnapshot {
            name: "test-rule".to_string(),
            direction,
            allowed: allowed
                .iter()
                .map(|(proto, ports)| AllowedRule {
                    protocol: proto.to_string(),
                    ports: ports.iter().map(|p| p.parse().unwrap()).collect(),
                })
                .collect(),
            source_ranges: ranges.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn whitelist(entries: &[&str]) -> Vec<FirewallWhitelistEntry> {
        entries.iter().map(|e| e.parse().unwrap()).collect()
    }

    const MIXED_PORTS: &[&str] = &["22", "3389", "8000", "8081"];

    #[test]
    fn open_world_rule_allowed_by_open_world_whitelist() {
        let snapshot = rule(Direction::Ingress, &[("tcp", MIXED_PORTS)], &["0.0.0.0/0"]);
        let result = evaluate(&snapshot, &whitelist(&["tcp:0.0.0.0/0:0-65535"]));
        assert!(!result.is_violation);
    }

    #[test]
    fn open_world_rule_rejected_by_narrower_network() {
        let snapshot = rule(Direction::Ingress, &[("tcp", MIXED_PORTS)], &["0.0.0.0/0"]);
        let result = evaluate(&snapshot, &whitelist(&["tcp:10.0.0.0/8:0-65535"]));
        assert!(result.is_violation);
        assert_eq!(result.offending_ranges, vec!["0.0.0.0/0".to_string()]);
        assert!(result.reason.contains("0.0.0.0/0"));
    }

    #[test]
    fn all_addresses_is_public() {
        let net: Ipv4Network = "0.0.0.0/0".parse().unwrap();
        assert!(!is_private_network(&net));
        assert!(is_public_range("0.0.0.0/0", &net));
    }

    #[test]
    fn range_spanning_two_private_blocks_is_public() {
        // 0.0.0.0 and 127.255.255.255 are both reserved, the space between is not
        for wide in ["0.0.0.0/1", "192.0.0.0/2"] {
            let net: Ipv4Network = wide.parse().unwrap();
            assert!(!is_private_network(&net), "{} is not private", wide);

            let snapshot = rule(Direction::Ingress, &[("tcp", &["22"])], &[wide]);
            let result = evaluate(&snapshot, &[]);
            assert!(result.is_violation);
            assert_eq!(result.offending_ranges, vec![wide.to_string()]);
        }
    }

    #[test]
    fn subnet_of_a_private_block_is_private() {
        for inner in ["10.1.0.0/16", "172.16.0.0/12", "192.0.0.170/32"] {
            let net: Ipv4Network = inner.parse().unwrap();
            assert!(is_private_network(&net), "{} is private", inner);
        }
        let straddling: Ipv4Network = "172.0.0.0/8".parse().unwrap();
        assert!(!is_private_network(&straddling));
    }

    #[test]
    fn private_ranges_are_skipped() {
        let snapshot = rule(
            Direction::Ingress,
            &[("tcp", &["22"])],
            &["10.0.0.0/8", "192.168.1.0/24", "172.16.5.0/24"],
        );
        assert!(!evaluate(&snapshot, &[]).is_violation);
    }

    #[test]
    fn egress_is_never_a_violation() {
        let snapshot = rule(Direction::Egress, &[("tcp", &[])], &["0.0.0.0/0"]);
        let result = evaluate(&snapshot, &[]);
        assert!(!result.is_violation);
    }

    #[test]
    fn public_range_without_whitelist_is_a_violation() {
        let snapshot = rule(Direction::Ingress, &[("tcp", &["443"])], &["35.1.2.0/24"]);
        let result = evaluate(&snapshot, &[]);
        assert!(result.is_violation);
        assert_eq!(result.offending_ranges, vec!["35.1.2.0/24".to_string()]);
    }

    #[test]
    fn subnet_with_covered_ports_is_compliant() {
        let snapshot = rule(
            Direction::Ingress,
            &[("tcp", &["443", "8000-8010"])],
            &["35.1.2.0/24"],
        );
        let result = evaluate(&snapshot, &whitelist(&["tcp:35.0.0.0/8:443,8000-8080"]));
        assert!(!result.is_violation);
    }

    #[test]
    fn uncovered_port_is_a_violation() {
        let snapshot = rule(Direction::Ingress, &[("tcp", &["22", "443"])], &["35.1.2.0/24"]);
        let result = evaluate(&snapshot, &whitelist(&["tcp:35.0.0.0/8:443"]));
        assert!(result.is_violation);
    }

    #[test]
    fn protocol_missing_from_whitelist_fails() {
        let snapshot = rule(Direction::Ingress, &[("udp", &["53"])], &["0.0.0.0/0"]);
        let result = evaluate(&snapshot, &whitelist(&["tcp:0.0.0.0/0"]));
        assert!(result.is_violation);
    }

    #[test]
    fn rule_without_ports_grants_everything() {
        let snapshot = rule(Direction::Ingress, &[("tcp", &[])], &["0.0.0.0/0"]);
        assert!(evaluate(&snapshot, &whitelist(&["tcp:0.0.0.0/0:1-65535"])).is_violation);
        assert!(!evaluate(&snapshot, &whitelist(&["tcp:0.0.0.0/0"])).is_violation);
    }

    #[test]
    fn first_violating_range_is_reported() {
        let snapshot = rule(
            Direction::Ingress,
            &[("tcp", &["443"])],
            &["10.0.0.0/8", "35.1.0.0/16", "0.0.0.0/0"],
        );
        let result = evaluate(&snapshot, &whitelist(&["tcp:34.0.0.0/8:443"]));
        assert_eq!(result.offending_ranges, vec!["35.1.0.0/16".to_string()]);
    }

    #[test]
    fn first_matching_entry_is_enough() {
        let snapshot = rule(Direction::Ingress, &[("tcp", &["443"])], &["35.1.0.0/16"]);
        let result = evaluate(
            &snapshot,
            &whitelist(&["tcp:36.0.0.0/8:443", "tcp:35.0.0.0/8:443"]),
        );
        assert!(!result.is_violation);
    }

    #[test]
    fn public_ipv6_range_is_reported() {
        let snapshot = rule(Direction::Ingress, &[("tcp", &["443"])], &["::/0"]);
        let result = evaluate(&snapshot, &whitelist(&["tcp:0.0.0.0/0"]));
        assert!(result.is_violation);
        assert_eq!(result.offending_ranges, vec!["::/0".to_string()]);
    }

    #[test]
    fn private_ipv6_ranges_are_skipped() {
        let snapshot = rule(
            Direction::Ingress,
            &[("tcp", &["22"])],
            &["fd00::/8", "fe80::/64", "::1/128"],
        );
        assert!(!evaluate(&snapshot, &[]).is_violation);

        let mixed = rule(Direction::Ingress, &[("tcp", &["22"])], &["fd00::/8", "2001:db8::/32"]);
        assert_eq!(
            evaluate(&mixed, &[]).offending_ranges,
            vec!["2001:db8::/32".to_string()]
        );
    }

    #[test]
    fn garbage_range_is_reported() {
        let snapshot = rule(Direction::Ingress, &[("tcp", &["22"])], &["not-a-range"]);
        assert!(evaluate(&snapshot, &whitelist(&["tcp:0.0.0.0/0"])).is_violation);
    }

    #[test]
    fn deserializes_compute_api_shape() {
        let json = serde_json::json!({
            "name": "allow-web",
            "direction": "INGRESS",
            "allowed": [
                {"IPProtocol": "tcp", "ports": ["80", "8000-8080"]},
                {"IPProtocol": "icmp"}
            ],
            "sourceRanges": ["0.0.0.0/0"],
            "network": "global/networks/default",
            "priority": 1000
        });
        let snapshot: FirewallSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(snapshot.allowed.len(), 2);
        assert!(snapshot.allowed[1].ports.is_empty());
        let proto_ports = snapshot.proto_ports();
        assert_eq!(proto_ports["icmp"], vec![PortSpec::ALL]);
        assert_eq!(
            proto_ports["tcp"],
            vec![PortSpec::Single(80), PortSpec::Range(8000, 8080)]
        );
    }
}
