//! Idempotent firewall provisioning for a tunnel interface, grounded in
//! `gnosis_vpn-root/src/routing/iptables_ops.rs`'s trait-over-real-impl
//! split (§9.6).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("packet filter tool unavailable: {0}")]
    Unavailable(String),
    #[error("iptables operation failed: {0}")]
    Operation(String),
}

#[async_trait]
pub trait FirewallOps: Send + Sync {
    /// Installs (idempotently) the rules needed for `interface` to carry
    /// `cidr` traffic and NAT it out through `egress_interface` (§4.3).
    async fn ensure_rules(
        &self,
        interface: &str,
        listen_port: u16,
        cidr: &str,
        egress_interface: &str,
    ) -> Result<(), Error>;
}

pub struct IptablesFirewall;

impl IptablesFirewall {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IptablesFirewall {
    fn default() -> Self {
        Self::new()
    }
}

struct Rule {
    table: &'static str,
    chain: &'static str,
    spec: Vec<String>,
}

fn rules(interface: &str, listen_port: u16, cidr: &str, egress_interface: &str) -> Vec<Rule> {
    vec![
        Rule {
            table: "filter",
            chain: "INPUT",
            spec: vec!["-p".into(), "udp".into(), "--dport".into(), listen_port.to_string(), "-j".into(), "ACCEPT".into()],
        },
        Rule {
            table: "filter",
            chain: "INPUT",
            spec: vec!["-i".into(), interface.into(), "-j".into(), "ACCEPT".into()],
        },
        Rule {
            table: "filter",
            chain: "OUTPUT",
            spec: vec!["-o".into(), interface.into(), "-j".into(), "ACCEPT".into()],
        },
        Rule {
            table: "filter",
            chain: "FORWARD",
            spec: vec!["-i".into(), interface.into(), "-j".into(), "ACCEPT".into()],
        },
        Rule {
            table: "filter",
            chain: "FORWARD",
            spec: vec!["-o".into(), interface.into(), "-j".into(), "ACCEPT".into()],
        },
        Rule {
            table: "nat",
            chain: "POSTROUTING",
            spec: vec!["-s".into(), cidr.into(), "-o".into(), egress_interface.into(), "-j".into(), "MASQUERADE".into()],
        },
    ]
}

#[async_trait]
impl FirewallOps for IptablesFirewall {
    async fn ensure_rules(
        &self,
        interface: &str,
        listen_port: u16,
        cidr: &str,
        egress_interface: &str,
    ) -> Result<(), Error> {
        let wanted = rules(interface, listen_port, cidr, egress_interface);
        tokio::task::spawn_blocking(move || {
            let ipt = iptables::new(false).map_err(|e| Error::Unavailable(e.to_string()))?;
            for rule in &wanted {
                let spec = rule.spec.join(" ");
                let exists = ipt
                    .exists(rule.table, rule.chain, &spec)
                    .map_err(|e| Error::Operation(e.to_string()))?;
                if !exists {
                    ipt.append(rule.table, rule.chain, &spec).map_err(|e| Error::Operation(e.to_string()))?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::Operation(e.to_string()))?
    }
}
