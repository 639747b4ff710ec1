//! Desired-state data model shared by the inventory client, reconciler,
//! and peer/config builder.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How long a handshake may age before a peer is considered offline (§3/§4.5).
pub const HANDSHAKE_FRESHNESS_SECS: i64 = 180;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid CIDR `{0}`")]
    InvalidCidr(String),
    #[error("CIDR `{0}` prefix must be <= 30")]
    PrefixTooLarge(String),
    #[error("peer `{public_key}` has no allowed-ips")]
    NoAllowedIps { public_key: String },
    #[error("peer `{public_key}` tunnel ip `{ip}` is outside network cidr `{cidr}`")]
    IpOutsideNetwork { public_key: String, ip: String, cidr: String },
    #[error("peer `{public_key}` tunnel ip `{ip}` collides with the server address")]
    CollidesWithServer { public_key: String, ip: String },
    #[error("peer `{public_key}` tunnel ip `{ip}` collides with another enabled peer")]
    DuplicateIp { public_key: String, ip: String },
}

/// A VPN network, identified by an opaque id stable across runs (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VpnNetwork {
    pub id: String,
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub dns_servers: Option<Vec<Ipv4Addr>>,
    #[serde(default)]
    pub server_endpoint: Option<String>,
    #[serde(default)]
    pub server_private_key: Option<String>,
    #[serde(default)]
    pub server_public_key: Option<String>,
}

impl VpnNetwork {
    /// `wg-<first 8 hex chars of id, hyphens stripped>` (§3).
    pub fn interface_name(&self) -> String {
        let hex: String = self.id.chars().filter(|c| c.is_ascii_hexdigit()).take(8).collect();
        format!("wg-{hex}")
    }

    pub fn parsed_cidr(&self) -> Result<(Ipv4Addr, u8), Error> {
        parse_cidr(&self.cidr)
    }

    /// `network_address + 1`, the address the server always occupies (§3).
    pub fn server_address(&self) -> Result<Ipv4Addr, Error> {
        let (addr, prefix) = self.parsed_cidr()?;
        let net = network_address(addr, prefix);
        Ok(Ipv4Addr::from(u32::from(net).wrapping_add(1)))
    }

    pub fn server_address_with_prefix(&self) -> Result<String, Error> {
        let (_, prefix) = self.parsed_cidr()?;
        Ok(format!("{}/{}", self.server_address()?, prefix))
    }
}

pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), Error> {
    let (addr_part, prefix_part) = cidr.split_once('/').ok_or_else(|| Error::InvalidCidr(cidr.to_string()))?;
    let addr: Ipv4Addr = addr_part.parse().map_err(|_| Error::InvalidCidr(cidr.to_string()))?;
    let prefix: u8 = prefix_part.parse().map_err(|_| Error::InvalidCidr(cidr.to_string()))?;
    if prefix > 30 {
        return Err(Error::PrefixTooLarge(cidr.to_string()));
    }
    Ok((addr, prefix))
}

pub fn network_address(addr: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    Ipv4Addr::from(u32::from(addr) & mask)
}

/// A router; never exists without a parent network in the same snapshot (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Router {
    pub id: String,
    pub name: String,
    pub vpn_network_id: String,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

fn default_enabled() -> bool {
    true
}

/// A WireGuard peer belonging to a router (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub public_key: String,
    #[serde(default)]
    pub private_key: Option<String>,
    pub allowed_ips: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

impl Peer {
    /// A disabled peer, or one with an empty public key / allowed-ips, is
    /// omitted from the rendered config entirely (§4.2 edge cases).
    pub fn is_renderable(&self) -> bool {
        self.is_enabled && !self.public_key.trim().is_empty() && !self.allowed_ips.trim().is_empty()
    }

    pub fn allowed_ip_list(&self) -> Vec<&str> {
        self.allowed_ips.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
    }

    /// The peer's own tunnel address, without a prefix.
    pub fn tunnel_address(&self) -> Option<&str> {
        self.allowed_ip_list().first().map(|ip| ip.split('/').next().unwrap_or(ip))
    }

    /// First allowed-ip element normalized to `/32`; remaining elements pass through (§3/§4.2).
    pub fn normalized_allowed_ips(&self) -> String {
        self.allowed_ip_list()
            .into_iter()
            .enumerate()
            .map(|(i, ip)| {
                if i == 0 {
                    let addr = ip.split('/').next().unwrap_or(ip);
                    format!("{addr}/32")
                } else {
                    ip.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Validates the peer's tunnel ip against its network's cidr, the
    /// server address, and the set of tunnel ips already claimed on this
    /// interface (§3 invariants, §7 input-contract violations).
    pub fn validate_tunnel_ip(&self, network: &VpnNetwork, taken: &mut HashSet<Ipv4Addr>) -> Result<Ipv4Addr, Error> {
        let raw = self.tunnel_address().ok_or_else(|| Error::NoAllowedIps {
            public_key: self.public_key.clone(),
        })?;
        let ip: Ipv4Addr = raw.parse().map_err(|_| Error::IpOutsideNetwork {
            public_key: self.public_key.clone(),
            ip: raw.to_string(),
            cidr: network.cidr.clone(),
        })?;
        let (net_addr, prefix) = network.parsed_cidr()?;
        let network_addr = network_address(net_addr, prefix);
        let host_bits = 32 - prefix;
        let broadcast = u32::from(network_addr) | (u32::MAX >> prefix);
        let in_range = u32::from(ip) >= u32::from(network_addr) && u32::from(ip) <= broadcast;
        let is_host = host_bits == 0 || (u32::from(ip) != u32::from(network_addr) && u32::from(ip) != broadcast);
        if !in_range || !is_host {
            return Err(Error::IpOutsideNetwork {
                public_key: self.public_key.clone(),
                ip: raw.to_string(),
                cidr: network.cidr.clone(),
            });
        }
        if ip == network.server_address()? {
            return Err(Error::CollidesWithServer {
                public_key: self.public_key.clone(),
                ip: raw.to_string(),
            });
        }
        if !taken.insert(ip) {
            return Err(Error::DuplicateIp {
                public_key: self.public_key.clone(),
                ip: raw.to_string(),
            });
        }
        Ok(ip)
    }
}

/// Transient, reconstructed on each `wg show all dump` (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerRuntime {
    pub interface: String,
    pub public_key: String,
    pub endpoint: Option<String>,
    /// UNIX time, 0 means "never handshaked".
    pub latest_handshake: i64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Online,
    Offline,
}

impl PeerRuntime {
    pub fn status(&self, now: i64) -> PeerStatus {
        classify_status(self.latest_handshake, now)
    }
}

/// `online` iff `now - handshake` is in `[0, 180)` seconds (§3/§4.5/§8 invariant 6).
pub fn classify_status(latest_handshake: i64, now: i64) -> PeerStatus {
    if latest_handshake <= 0 {
        return PeerStatus::Offline;
    }
    let diff = now - latest_handshake;
    if diff < 0 {
        tracing::warn!(latest_handshake, now, "handshake timestamp is in the future");
        return PeerStatus::Offline;
    }
    if diff < HANDSHAKE_FRESHNESS_SECS {
        PeerStatus::Online
    } else {
        PeerStatus::Offline
    }
}

/// `public_key -> {router, network}`; source of truth fallback is the
/// per-interface config file's comment header (§3/§4.6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub router_id: String,
    pub router_name: String,
    pub vpn_network_id: String,
    pub vpn_network_name: String,
    pub peer_ip: String,
    pub allowed_ips: String,
}

/// Process-wide snapshot published atomically at the end of each
/// successful reconcile pass (§3/§5).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ManagedState {
    pub vpn_networks: Vec<VpnNetwork>,
    pub routers: Vec<Router>,
    pub last_sync_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ManagedState {
    pub fn network(&self, id: &str) -> Option<&VpnNetwork> {
        self.vpn_networks.iter().find(|n| n.id == id)
    }

    /// Routers whose parent network id is not also present in the state are
    /// dropped (§4.2 edge cases: "no partial apply").
    pub fn routers_for(&self, network_id: &str) -> Vec<&Router> {
        self.routers.iter().filter(|r| r.vpn_network_id == network_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(cidr: &str) -> VpnNetwork {
        VpnNetwork {
            id: "aaaaaaaa-1111-2222-3333-444444444444".to_string(),
            name: "test".to_string(),
            cidr: cidr.to_string(),
            dns_servers: None,
            server_endpoint: None,
            server_private_key: None,
            server_public_key: None,
        }
    }

    #[test]
    fn interface_name_is_first_8_hex_chars_with_wg_dash_prefix() {
        assert_eq!(network("10.100.1.0/24").interface_name(), "wg-aaaaaaaa");
    }

    #[test]
    fn server_address_is_network_address_plus_one() {
        let n = network("10.100.1.0/24");
        assert_eq!(n.server_address().unwrap(), Ipv4Addr::new(10, 100, 1, 1));
        assert_eq!(n.server_address_with_prefix().unwrap(), "10.100.1.1/24");
    }

    #[test]
    fn prefix_over_30_is_rejected() {
        assert_eq!(network("10.0.0.0/31").server_address(), Err(Error::PrefixTooLarge("10.0.0.0/31".to_string())));
    }

    #[test]
    fn normalized_allowed_ips_forces_first_element_to_slash_32() {
        let peer = Peer {
            id: "p1".to_string(),
            public_key: "PK1".to_string(),
            private_key: None,
            allowed_ips: "10.100.1.5/24, 192.168.0.0/16".to_string(),
            is_enabled: true,
        };
        assert_eq!(peer.normalized_allowed_ips(), "10.100.1.5/32, 192.168.0.0/16");
    }

    #[test]
    fn validate_tunnel_ip_rejects_server_collision() {
        let n = network("10.100.1.0/24");
        let peer = Peer {
            id: "p1".to_string(),
            public_key: "PK1".to_string(),
            private_key: None,
            allowed_ips: "10.100.1.1/24".to_string(),
            is_enabled: true,
        };
        let mut taken = HashSet::new();
        assert!(matches!(peer.validate_tunnel_ip(&n, &mut taken), Err(Error::CollidesWithServer { .. })));
    }

    #[test]
    fn validate_tunnel_ip_rejects_duplicate_within_interface() {
        let n = network("10.100.1.0/24");
        let peer = Peer {
            id: "p1".to_string(),
            public_key: "PK1".to_string(),
            private_key: None,
            allowed_ips: "10.100.1.5/24".to_string(),
            is_enabled: true,
        };
        let mut taken = HashSet::new();
        assert!(peer.validate_tunnel_ip(&n, &mut taken).is_ok());
        assert!(matches!(peer.validate_tunnel_ip(&n, &mut taken), Err(Error::DuplicateIp { .. })));
    }

    #[test]
    fn validate_tunnel_ip_rejects_address_outside_cidr() {
        let n = network("10.100.1.0/24");
        let peer = Peer {
            id: "p1".to_string(),
            public_key: "PK1".to_string(),
            private_key: None,
            allowed_ips: "10.100.2.5/24".to_string(),
            is_enabled: true,
        };
        let mut taken = HashSet::new();
        assert!(matches!(peer.validate_tunnel_ip(&n, &mut taken), Err(Error::IpOutsideNetwork { .. })));
    }

    #[test]
    fn classify_status_handles_future_timestamps_as_offline() {
        assert_eq!(classify_status(2_000, 1_000), PeerStatus::Offline);
        assert_eq!(classify_status(821, 1_000), PeerStatus::Online);
        assert_eq!(classify_status(800, 1_000), PeerStatus::Offline);
        assert_eq!(classify_status(0, 1_000), PeerStatus::Offline);
    }
}
