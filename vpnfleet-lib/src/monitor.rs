//! Bounded ICMP liveness probing, one peer per router, fanned out behind a
//! counting semaphore, preferring WireGuard's own handshake truth over
//! ICMP reachability when both are available (§4.7).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::identity_cache::IdentityCache;
use crate::inventory::{InventoryClient, PeerStatsUpdate, RouterFields};
use crate::model::PeerStatus;
use crate::platform::PlatformOps;
use crate::runtime::RuntimeReader;
use crate::state::StateReader;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Platform(#[from] crate::platform::Error),
}

#[derive(Debug, Default, Clone)]
pub struct MonitorTick {
    pub probed: usize,
    pub online: usize,
    pub offline: usize,
    pub failures: Vec<(String, String)>,
}

impl fmt::Display for MonitorTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "monitor tick: {} probed, {} online, {} offline, {} push failures",
            self.probed,
            self.online,
            self.offline,
            self.failures.len()
        )
    }
}

pub struct Monitor {
    state: StateReader,
    identity_cache: Arc<IdentityCache>,
    inventory: InventoryClient,
    platform: Arc<dyn PlatformOps>,
    wg_dir: PathBuf,
    ping_attempts: u32,
    ping_timeout: Duration,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl Monitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: StateReader,
        identity_cache: Arc<IdentityCache>,
        inventory: InventoryClient,
        platform: Arc<dyn PlatformOps>,
        wg_dir: PathBuf,
        ping_attempts: u32,
        ping_timeout: Duration,
        max_concurrent_pings: usize,
    ) -> Self {
        Self {
            state,
            identity_cache,
            inventory,
            platform,
            wg_dir,
            ping_attempts,
            ping_timeout,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_pings.max(1))),
        }
    }

    fn config_path(&self, interface: &str) -> PathBuf {
        self.wg_dir.join(format!("{interface}.conf"))
    }

    /// Probes the first enabled peer of every router in the current
    /// `ManagedState` snapshot, concurrently bounded by the configured
    /// semaphore, and pushes results back to inventory (§4.7).
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> Result<MonitorTick, Error> {
        let state = self.state.snapshot();
        let now = chrono::Utc::now().timestamp();

        let runtime_reader = RuntimeReader::new(self.platform.as_ref());
        let (_, dump_peers) = runtime_reader.dump().await?;
        let by_key_and_interface: HashMap<(String, String), &crate::model::PeerRuntime> =
            dump_peers.iter().map(|p| ((p.interface.clone(), p.public_key.clone()), p)).collect();

        let mut human_handshakes: HashMap<String, HashMap<String, i64>> = HashMap::new();

        let mut tick = MonitorTick::default();
        let mut join_set = tokio::task::JoinSet::new();

        for router in state.routers.clone() {
            let Some(peer) = router.peers.iter().find(|p| p.is_renderable()).cloned() else {
                continue;
            };
            let Some(network) = state.network(&router.vpn_network_id) else {
                continue;
            };
            let interface = network.interface_name();

            if !human_handshakes.contains_key(&interface) {
                let handshakes = runtime_reader.human_handshakes(&interface, now).await.unwrap_or_default();
                human_handshakes.insert(interface.clone(), handshakes);
            }

            let runtime_peer = by_key_and_interface.get(&(interface.clone(), peer.public_key.clone())).copied().cloned();
            let preferred_handshake = human_handshakes
                .get(&interface)
                .and_then(|m| m.get(&peer.public_key))
                .copied()
                .or_else(|| runtime_peer.as_ref().map(|p| p.latest_handshake));

            let semaphore = self.semaphore.clone();
            let platform = self.platform.clone();
            let ping_attempts = self.ping_attempts;
            let ping_timeout = self.ping_timeout;
            let tunnel_ip = peer.tunnel_address().unwrap_or_default().to_string();
            let router_clone = router.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let ping = platform.ping(&tunnel_ip, ping_attempts, ping_timeout).await;
                (router_clone, peer, runtime_peer, preferred_handshake, ping)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (router, peer, runtime_peer, preferred_handshake, ping_result) = match joined {
                Ok(v) => v,
                Err(e) => {
                    tick.failures.push(("<task>".to_string(), e.to_string()));
                    continue;
                }
            };
            tick.probed += 1;

            let ping_stats = match ping_result {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::warn!(router_id = %router.id, error = %e, "ping invocation failed");
                    crate::ping::PingStats::default()
                }
            };

            // WireGuard's own handshake truth wins over ICMP reachability
            // whenever a runtime record exists (§4.7).
            let handshake = preferred_handshake.unwrap_or(0);
            let status = if runtime_peer.is_some() {
                crate::model::classify_status(handshake, now)
            } else if ping_stats.success() {
                PeerStatus::Online
            } else {
                PeerStatus::Offline
            };

            match status {
                PeerStatus::Online => tick.online += 1,
                PeerStatus::Offline => tick.offline += 1,
            }

            if let Some(network) = self.state.snapshot().network(&router.vpn_network_id) {
                let _ = self.identity_cache.get_or_rehydrate(&peer.public_key, &self.config_path(&network.interface_name())).await;
            }

            let last_handshake_iso = chrono::DateTime::<chrono::Utc>::from_timestamp(handshake.max(0), 0)
                .unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap())
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            let now_iso = chrono::DateTime::<chrono::Utc>::from_timestamp(now, 0)
                .unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap())
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

            let stats_update = PeerStatsUpdate {
                last_handshake: last_handshake_iso,
                bytes_received: runtime_peer.as_ref().map(|p| p.rx_bytes).unwrap_or(0),
                bytes_sent: runtime_peer.as_ref().map(|p| p.tx_bytes).unwrap_or(0),
                ping_success: ping_stats.success(),
                ping_avg_time_ms: ping_stats.avg_ms,
                ping_packet_loss: Some(ping_stats.packet_loss_pct),
            };
            if let Err(e) = self.inventory.patch_peer_stats(&peer.id, &stats_update).await {
                tracing::warn!(peer_id = %peer.id, error = %e, "failed to push peer stats");
                tick.failures.push((peer.id.clone(), e.to_string()));
            }

            // lastSeenAt is the probe's own wall-clock time, not the peer's
            // handshake time — a router can be online with a handshake that
            // happened several minutes ago.
            let router_fields = RouterFields {
                status: Some(if status == PeerStatus::Online { 1 } else { 2 }),
                last_seen_at: matches!(status, PeerStatus::Online).then_some(now_iso),
                latency: ping_stats.avg_ms.map(|ms| ms.round() as i64),
                ..Default::default()
            };
            if let Err(e) = self.inventory.put_router(&router.id, &router_fields).await {
                tracing::warn!(router_id = %router.id, error = %e, "failed to push router status");
                tick.failures.push((router.id.clone(), e.to_string()));
            }
        }

        Ok(tick)
    }
}

