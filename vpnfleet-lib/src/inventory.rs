//! HTTP client for the fleet inventory service (§4.1, §6). Grounded in the
//! teacher's `gnosis_vpn-lib/src/wg_client.rs` request-building style, but
//! async (`reqwest` without the `blocking` feature) per §5's concurrency
//! requirements.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::{Peer, Router, VpnNetwork};

const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("request to inventory service failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid inventory response body: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("invalid inventory url: {0}")]
    Url(#[from] url::ParseError),
    #[error("inventory service returned {0}")]
    UnexpectedStatus(StatusCode),
}

/// `fetch_snapshot` never treats "no such endpoint" as an error (§4.1,
/// §4.2: "snapshot is `NotFound`" is a distinct, expected policy branch).
pub enum FetchOutcome {
    Snapshot(Snapshot),
    NotFound,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub vpn_networks: Vec<VpnNetwork>,
    pub routers: Vec<Router>,
}

#[derive(Debug, Deserialize)]
struct SnapshotBody {
    #[serde(default)]
    vpn_networks: Vec<VpnNetworkBody>,
    #[serde(default)]
    routers: Vec<RouterBody>,
}

#[derive(Debug, Deserialize)]
struct VpnNetworkBody {
    id: String,
    name: String,
    cidr: String,
    #[serde(default)]
    dns_servers: Option<Vec<std::net::Ipv4Addr>>,
    #[serde(default)]
    server_endpoint: Option<String>,
    #[serde(default)]
    server_private_key: Option<String>,
    #[serde(default)]
    server_public_key: Option<String>,
}

impl From<VpnNetworkBody> for VpnNetwork {
    fn from(b: VpnNetworkBody) -> Self {
        VpnNetwork {
            id: b.id,
            name: b.name,
            cidr: b.cidr,
            dns_servers: b.dns_servers,
            server_endpoint: b.server_endpoint,
            server_private_key: b.server_private_key,
            server_public_key: b.server_public_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RouterBody {
    id: String,
    name: String,
    vpn_network_id: String,
    #[serde(default)]
    peers: Vec<PeerBody>,
}

#[derive(Debug, Deserialize)]
struct PeerBody {
    id: String,
    public_key: String,
    #[serde(default)]
    private_key: Option<String>,
    allowed_ips: String,
    #[serde(default = "default_enabled")]
    is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<RouterBody> for Router {
    fn from(b: RouterBody) -> Self {
        Router {
            id: b.id,
            name: b.name,
            vpn_network_id: b.vpn_network_id,
            peers: b.peers.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<PeerBody> for Peer {
    fn from(b: PeerBody) -> Self {
        Peer {
            id: b.id,
            public_key: b.public_key,
            private_key: b.private_key,
            allowed_ips: b.allowed_ips,
            is_enabled: b.is_enabled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PeerStatsUpdate {
    pub last_handshake: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub ping_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_avg_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_packet_loss: Option<f64>,
}

#[derive(Debug, Serialize, Default)]
pub struct RouterFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u8>,
    #[serde(rename = "lastSeenAt", skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<i64>,
    #[serde(rename = "hardwareInfo", skip_serializing_if = "Option::is_none")]
    pub hardware_info: Option<String>,
    #[serde(rename = "firmwareVersion", skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

pub struct InventoryClient {
    client: Client,
    base_url: Url,
}

impl InventoryClient {
    pub fn new(base_url: Url, verify_tls: bool) -> Result<Self, Error> {
        let client = Client::builder().danger_accept_invalid_certs(!verify_tls).build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    /// `GET /api/vpn-servers/{endpoint_id}/resources` (§6). `NotFound` is a
    /// normal outcome, not an `Err`; only transport/parse failures are.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_snapshot(&self, endpoint_id: &str) -> Result<FetchOutcome, Error> {
        let url = self.url(&format!("/api/vpn-servers/{endpoint_id}/resources"))?;
        let response = self.client.get(url).timeout(REQUEST_DEADLINE).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(FetchOutcome::NotFound);
        }
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status()));
        }
        let body: SnapshotBody = response.json().await?;
        Ok(FetchOutcome::Snapshot(Snapshot {
            vpn_networks: body.vpn_networks.into_iter().map(Into::into).collect(),
            routers: body.routers.into_iter().map(Into::into).collect(),
        }))
    }

    /// `PATCH /api/wireguard/peers/{peer_id}/stats` (§6).
    #[tracing::instrument(skip(self, stats))]
    pub async fn patch_peer_stats(&self, peer_id: &str, stats: &PeerStatsUpdate) -> Result<(), Error> {
        let url = self.url(&format!("/api/wireguard/peers/{peer_id}/stats"))?;
        let response = self.client.patch(url).timeout(REQUEST_DEADLINE).json(stats).send().await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status()));
        }
        Ok(())
    }

    /// `PUT /api/routers/{router_id}` (§6).
    #[tracing::instrument(skip(self, fields))]
    pub async fn put_router(&self, router_id: &str, fields: &RouterFields) -> Result<(), Error> {
        let url = self.url(&format!("/api/routers/{router_id}"))?;
        let response = self.client.put(url).timeout(REQUEST_DEADLINE).json(fields).send().await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status()));
        }
        Ok(())
    }

    /// `GET /api/routers/{router_id}/wireguard/peers` (§4.1, §6; used by
    /// the ad-hoc provisioning/RouterOS-helper surface, not THE CORE's
    /// periodic loops).
    #[tracing::instrument(skip(self))]
    pub async fn get_router_peers(&self, router_id: &str) -> Result<Vec<Peer>, Error> {
        let url = self.url(&format!("/api/routers/{router_id}/wireguard/peers"))?;
        let response = self.client.get(url).timeout(REQUEST_DEADLINE).send().await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status()));
        }
        let body: Vec<PeerBody> = response.json().await?;
        Ok(body.into_iter().map(Into::into).collect())
    }
}
