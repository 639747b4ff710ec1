//! Renders and parses the per-interface WireGuard config file, including
//! the identity comment block that precedes each `[Peer]` stanza (§4.4).

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::model::{IdentityRecord, Peer, VpnNetwork};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] crate::model::Error),
}

/// A peer plus the router/network context needed for the comment header.
pub struct RenderPeer<'a> {
    pub router_id: &'a str,
    pub router_name: &'a str,
    pub peer: &'a Peer,
}

const HEADER_RULE: &str = "# ============================================";

/// Builds the full interface config text: `[Interface]` stanza followed by
/// one `[Peer]` block (with identity comment header) per renderable peer,
/// in the order supplied (§4.2 orders by `(router_id, public_key)` before
/// calling this; §4.4).
pub fn render(network: &VpnNetwork, private_key: &str, peers: &[RenderPeer<'_>]) -> Result<String, Error> {
    let mut out = String::new();
    out.push_str("[Interface]\n");
    out.push_str(&format!("PrivateKey = {private_key}\n"));
    out.push_str(&format!("Address = {}\n", network.server_address_with_prefix()?));
    out.push_str("ListenPort = 51820\n");
    if let Some(dns) = &network.dns_servers {
        if !dns.is_empty() {
            let joined = dns.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(", ");
            out.push_str(&format!("DNS = {joined}\n"));
        }
    }

    for rp in peers {
        if !rp.peer.is_renderable() {
            continue;
        }
        out.push('\n');
        out.push_str(HEADER_RULE);
        out.push('\n');
        out.push_str(&format!("# Router: {}\n", rp.router_name));
        out.push_str(&format!("# Router ID: {}\n", rp.router_id));
        out.push_str(&format!("# VPN Network: {}\n", network.name));
        out.push_str(&format!("# VPN Network ID: {}\n", network.id));
        out.push_str(&format!("# Peer IP: {}\n", rp.peer.tunnel_address().unwrap_or_default()));
        out.push_str(&format!("# Public Key: {}\n", rp.peer.public_key));
        out.push_str(HEADER_RULE);
        out.push('\n');
        out.push_str("[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", rp.peer.public_key));
        out.push_str(&format!("AllowedIPs = {}\n", rp.peer.normalized_allowed_ips()));
        out.push_str("PersistentKeepalive = 25\n");
    }
    Ok(out)
}

/// Whitespace-insensitive comparison used to decide whether a rewrite is
/// actually needed (§4.2: "semantic, not textual" diff).
pub fn semantically_equal(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn normalize(text: &str) -> String {
    text.lines().map(str::trim_end).collect::<Vec<_>>().join("\n").trim_end_matches('\n').to_string()
}

fn peer_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^# Router: (?P<router_name>.*)\n# Router ID: (?P<router_id>.*)\n# VPN Network: (?P<vpn_network_name>.*)\n# VPN Network ID: (?P<vpn_network_id>.*)\n# Peer IP: (?P<peer_ip>.*)\n# Public Key: (?P<public_key>.*)\n# =+\n\[Peer\]\nPublicKey = .*\nAllowedIPs = (?P<allowed_ips>.*)\n",
        )
        .unwrap()
    })
}

/// Recovers `public_key -> IdentityRecord` pairs from a rendered config's
/// comment headers, used to rehydrate the identity cache on cold start or
/// cache miss (§4.6).
pub fn parse_identity_blocks(text: &str) -> Vec<(String, IdentityRecord)> {
    peer_block_re()
        .captures_iter(text)
        .map(|c| {
            let record = IdentityRecord {
                router_id: c["router_id"].to_string(),
                router_name: c["router_name"].to_string(),
                vpn_network_id: c["vpn_network_id"].to_string(),
                vpn_network_name: c["vpn_network_name"].to_string(),
                peer_ip: c["peer_ip"].to_string(),
                allowed_ips: c["allowed_ips"].to_string(),
            };
            (c["public_key"].to_string(), record)
        })
        .collect()
}

/// Extracts the `PrivateKey` line from an existing `[Interface]` stanza,
/// used to recover a previously generated server key across restarts when
/// inventory doesn't supply one (§4.3).
pub fn parse_private_key(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("PrivateKey") {
            let value = rest.trim_start().trim_start_matches('=').trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
