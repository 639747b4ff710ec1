//! Parses `wg show all dump` (machine format) and `wg show <iface>` (human
//! format, used as a handshake-freshness fallback) (§4.5).

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::model::PeerRuntime;
use crate::platform::{self, PlatformOps};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Platform(#[from] platform::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceRuntime {
    pub name: String,
    pub public_key: String,
    pub listen_port: u16,
    pub fwmark: String,
}

/// Splits `wg show all dump` lines into interface summaries (4 fields) and
/// peer records (8+ fields); a peer line's own first column carries its
/// interface name (§4.5).
pub fn parse_dump(text: &str) -> (Vec<InterfaceRuntime>, Vec<PeerRuntime>) {
    let mut interfaces = Vec::new();
    let mut peers = Vec::new();
    let mut current_interface = String::new();

    for line in text.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() == 4 {
            current_interface = fields[0].to_string();
            interfaces.push(InterfaceRuntime {
                name: fields[0].to_string(),
                public_key: fields[1].to_string(),
                listen_port: fields[2].parse().unwrap_or(0),
                fwmark: fields[3].to_string(),
            });
        } else if fields.len() >= 8 {
            let interface = if fields[0].is_empty() { current_interface.clone() } else { fields[0].to_string() };
            let endpoint = if fields[2] == "(none)" { None } else { Some(fields[2].to_string()) };
            peers.push(PeerRuntime {
                interface,
                public_key: fields[1].to_string(),
                endpoint,
                latest_handshake: fields[4].parse().unwrap_or(0),
                rx_bytes: fields[5].parse().unwrap_or(0),
                tx_bytes: fields[6].parse().unwrap_or(0),
            });
        }
    }
    (interfaces, peers)
}

fn seconds_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+) seconds? ago$").unwrap())
}

fn minutes_seconds_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+) minutes?, (\d+) seconds? ago$").unwrap())
}

fn parse_ago(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(c) = seconds_only_re().captures(text) {
        return c.get(1)?.as_str().parse().ok();
    }
    if let Some(c) = minutes_seconds_re().captures(text) {
        let minutes: i64 = c.get(1)?.as_str().parse().ok()?;
        let seconds: i64 = c.get(2)?.as_str().parse().ok()?;
        return Some(minutes * 60 + seconds);
    }
    None
}

/// Parses `public_key -> unix handshake time` from `wg show <iface>`'s
/// human-readable output, preferred over the machine dump when available
/// (§4.5 design note on the dump-format handshake anomaly).
pub fn parse_human_handshakes(text: &str, now: i64) -> HashMap<String, i64> {
    let mut result = HashMap::new();
    let mut current_peer: Option<String> = None;
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if let Some(pk) = line.strip_prefix("peer:") {
            current_peer = Some(pk.trim().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("latest handshake:") {
            if let (Some(pk), Some(ago)) = (&current_peer, parse_ago(rest)) {
                result.insert(pk.clone(), now - ago);
            }
        }
    }
    result
}

/// Thin async wrapper pairing the pure parsers above with the platform
/// tool calls that produce their input.
pub struct RuntimeReader<'p> {
    platform: &'p (dyn PlatformOps + 'p),
}

impl<'p> RuntimeReader<'p> {
    pub fn new(platform: &'p (dyn PlatformOps + 'p)) -> Self {
        Self { platform }
    }

    pub async fn dump(&self) -> Result<(Vec<InterfaceRuntime>, Vec<PeerRuntime>), Error> {
        let text = self.platform.wg_show_all_dump().await?;
        Ok(parse_dump(&text))
    }

    pub async fn human_handshakes(&self, interface: &str, now: i64) -> Result<HashMap<String, i64>, Error> {
        let text = self.platform.wg_show(interface).await?;
        Ok(parse_human_handshakes(&text, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "wg-aaaaaaaa\tSERVERPRIVHIDDEN\t51820\toff\n\
wg-aaaaaaaa\tPUBKEY1\t(none)\t1.2.3.4:51820\t10.100.1.5/32\t1690000000\t1024\t2048\t25\n\
wg-aaaaaaaa\tPUBKEY2\t(none)\t(none)\t10.100.1.6/32\t0\t0\t0\t25\n";

    #[test]
    fn splits_interface_and_peer_lines() {
        let (interfaces, peers) = parse_dump(DUMP);
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].name, "wg-aaaaaaaa");
        assert_eq!(interfaces[0].listen_port, 51820);

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].interface, "wg-aaaaaaaa");
        assert_eq!(peers[0].public_key, "PUBKEY1");
        assert_eq!(peers[0].latest_handshake, 1690000000);
        assert_eq!(peers[1].endpoint, None);
        assert_eq!(peers[1].latest_handshake, 0);
    }

    #[test]
    fn parses_seconds_and_minutes_ago_forms() {
        let text = "interface: wg-aaaaaaaa\n\
peer: PUBKEY1\n\
  latest handshake: 52 seconds ago\n\
peer: PUBKEY2\n\
  latest handshake: 3 minutes, 10 seconds ago\n";
        let handshakes = parse_human_handshakes(text, 1_000_000);
        assert_eq!(handshakes["PUBKEY1"], 1_000_000 - 52);
        assert_eq!(handshakes["PUBKEY2"], 1_000_000 - 190);
    }

    #[test]
    fn unparseable_ago_strings_are_skipped() {
        let text = "peer: PUBKEY1\n  latest handshake: never\n";
        assert!(parse_human_handshakes(text, 1000).is_empty());
    }
}
