//! The reconciler: the 3-phase declarative pass that turns an inventory
//! snapshot into live WireGuard interfaces (§4.2).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::identity_cache::IdentityCache;
use crate::interface::InterfaceManager;
use crate::inventory::{FetchOutcome, InventoryClient, Snapshot};
use crate::model::{IdentityRecord, ManagedState, Router, VpnNetwork};
use crate::peer_config::{self, RenderPeer};
use crate::platform::PlatformOps;
use crate::runtime::RuntimeReader;
use crate::state::StateWriter;

#[derive(Debug, Error)]
pub enum PassError {
    #[error("all {count} attempted interface(s) failed to converge")]
    AllFailed { count: usize },
}

/// What the reconciler saw after resolving §4.2's policy branch
/// (configured endpoint / absent endpoint / inventory 404).
pub enum SnapshotView {
    Found(Snapshot),
    NotFound,
}

#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub files_rebuilt: Vec<String>,
    pub interfaces_cycled: Vec<String>,
    pub failures: Vec<(String, String)>,
    pub skipped: bool,
}

impl ReconcileReport {
    fn skipped() -> Self {
        Self { skipped: true, ..Default::default() }
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped {
            return write!(f, "reconcile pass skipped (already in flight or snapshot unavailable)");
        }
        write!(
            f,
            "reconcile pass: {} created, {} removed, {} rebuilt, {} cycled, {} failed",
            self.created.len(),
            self.removed.len(),
            self.files_rebuilt.len(),
            self.interfaces_cycled.len(),
            self.failures.len()
        )
    }
}

pub struct Reconciler {
    inventory: InventoryClient,
    interfaces: InterfaceManager,
    platform: Arc<dyn PlatformOps>,
    identity_cache: Arc<IdentityCache>,
    state: StateWriter,
    lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        inventory: InventoryClient,
        interfaces: InterfaceManager,
        platform: Arc<dyn PlatformOps>,
        identity_cache: Arc<IdentityCache>,
        state: StateWriter,
    ) -> Self {
        Self { inventory, interfaces, platform, identity_cache, state, lock: Mutex::new(()) }
    }

    /// Fetches the snapshot (or resolves the absent-endpoint policy branch)
    /// and runs a pass. Overlapping triggers coalesce: if a pass is
    /// already running, this call returns immediately without fetching or
    /// reconciling anything (§4.2, §5).
    #[tracing::instrument(skip(self))]
    pub async fn run_pass(&self, endpoint_id: Option<&str>) -> Result<ReconcileReport, PassError> {
        let Ok(_guard) = self.lock.try_lock() else {
            tracing::debug!("reconcile pass already running, coalescing this trigger");
            return Ok(ReconcileReport::skipped());
        };

        let view = match endpoint_id {
            None => {
                tracing::warn!("VPN_SERVER_ENDPOINT is not configured, owning nothing");
                SnapshotView::NotFound
            }
            Some(id) => match self.inventory.fetch_snapshot(id).await {
                Ok(FetchOutcome::Snapshot(snapshot)) => SnapshotView::Found(snapshot),
                Ok(FetchOutcome::NotFound) => {
                    tracing::info!(endpoint_id = id, "inventory has no snapshot for this endpoint, owning nothing");
                    SnapshotView::NotFound
                }
                Err(e) => {
                    tracing::warn!(error = %e, "snapshot fetch failed, skipping this pass entirely");
                    return Ok(ReconcileReport::skipped());
                }
            },
        };

        self.reconcile(view).await
    }

    pub async fn reconcile(&self, view: SnapshotView) -> Result<ReconcileReport, PassError> {
        let (networks, routers): (Vec<VpnNetwork>, Vec<Router>) = match view {
            SnapshotView::Found(s) => (s.vpn_networks, s.routers),
            SnapshotView::NotFound => (Vec::new(), Vec::new()),
        };

        let mut report = ReconcileReport::default();

        // Phase A: interface-set diff.
        let (existing_runtime, _) = match RuntimeReader::new(self.platform.as_ref()).dump().await {
            Ok(dump) => dump,
            Err(e) => {
                tracing::warn!(error = %e, "could not enumerate existing wireguard interfaces");
                return Ok(ReconcileReport::skipped());
            }
        };
        let existing: HashSet<String> =
            existing_runtime.into_iter().map(|i| i.name).filter(|n| n.starts_with("wg-")).collect();

        let mut networks_by_name: HashMap<String, &VpnNetwork> = HashMap::new();
        for network in &networks {
            networks_by_name.insert(network.interface_name(), network);
        }
        let expected: HashSet<String> = networks_by_name.keys().cloned().collect();

        let to_remove: BTreeSet<String> = existing.difference(&expected).cloned().collect();
        let to_create: BTreeSet<String> = expected.difference(&existing).cloned().collect();
        let matched: BTreeSet<String> = existing.intersection(&expected).cloned().collect();

        for name in &to_remove {
            match self.interfaces.remove_interface(name).await {
                Ok(()) => report.removed.push(name.clone()),
                Err(e) => {
                    tracing::warn!(interface = %name, error = %e, "failed to remove orphaned interface");
                    report.failures.push((name.clone(), e.to_string()));
                }
            }
        }

        for name in &to_create {
            let network = networks_by_name[name];
            match self.interfaces.ensure_interface(network).await {
                Ok(_) => report.created.push(name.clone()),
                Err(e) => {
                    tracing::warn!(interface = %name, error = %e, "failed to create interface");
                    report.failures.push((name.clone(), e.to_string()));
                }
            }
        }

        // Phase B + C: per matched-or-created interface, rebuild config and
        // cycle the interface only when its content actually changed.
        let mut attempted = 0usize;
        let mut converged = 0usize;
        let active: BTreeSet<String> = matched.union(&to_create).cloned().collect();
        for name in &active {
            if report.failures.iter().any(|(n, _)| n == name) {
                continue;
            }
            attempted += 1;
            let network = networks_by_name[name];
            match self.converge_interface(network, &routers).await {
                Ok(changed) => {
                    converged += 1;
                    if changed {
                        report.files_rebuilt.push(name.clone());
                        report.interfaces_cycled.push(name.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(interface = %name, error = %e, "failed to converge interface");
                    report.failures.push((name.clone(), e.to_string()));
                }
            }
        }

        self.state.publish(ManagedState { vpn_networks: networks, routers, last_sync_at: Some(chrono::Utc::now()) });

        if attempted > 0 && converged == 0 {
            return Err(PassError::AllFailed { count: attempted });
        }
        Ok(report)
    }

    /// Renders the desired config for `network`, compares it to what's on
    /// disk, and rewrites + cycles the interface only on a real change.
    /// Returns whether a rewrite happened.
    async fn converge_interface(&self, network: &VpnNetwork, routers: &[Router]) -> Result<bool, crate::interface::Error> {
        let name = network.interface_name();
        let path = self.interfaces.config_path(&name);
        let private_key = self.interfaces.resolve_private_key(network, &path).await?;

        let mut taken_ips = HashSet::new();
        let mut ordered: Vec<(&Router, &crate::model::Peer)> = Vec::new();
        for router in routers.iter().filter(|r| r.vpn_network_id == network.id) {
            for peer in &router.peers {
                if !peer.is_renderable() {
                    continue;
                }
                if let Err(e) = peer.validate_tunnel_ip(network, &mut taken_ips) {
                    tracing::warn!(public_key = %peer.public_key, error = %e, "skipping invalid peer");
                    continue;
                }
                ordered.push((router, peer));
            }
        }
        ordered.sort_by(|(ra, pa), (rb, pb)| (ra.id.as_str(), pa.public_key.as_str()).cmp(&(rb.id.as_str(), pb.public_key.as_str())));

        let render_peers: Vec<RenderPeer> =
            ordered.iter().map(|(router, peer)| RenderPeer { router_id: &router.id, router_name: &router.name, peer }).collect();

        let identities: Vec<(String, IdentityRecord)> = ordered
            .iter()
            .map(|(router, peer)| {
                (
                    peer.public_key.clone(),
                    IdentityRecord {
                        router_id: router.id.clone(),
                        router_name: router.name.clone(),
                        vpn_network_id: network.id.clone(),
                        vpn_network_name: network.name.clone(),
                        peer_ip: peer.tunnel_address().unwrap_or_default().to_string(),
                        allowed_ips: peer.normalized_allowed_ips(),
                    },
                )
            })
            .collect();
        self.identity_cache.upsert_many(identities);

        let desired = peer_config::render(network, &private_key, &render_peers)?;
        let current = tokio::fs::read_to_string(&path).await.unwrap_or_default();

        if peer_config::semantically_equal(&current, &desired) {
            return Ok(false);
        }

        crate::interface::write_validated(self.platform.as_ref(), &path, &desired).await?;
        if let Err(e) = self.platform.wg_quick_down(&path).await {
            tracing::debug!(interface = %name, error = %e, "wg-quick down failed before rebuild, continuing");
        }
        self.platform.wg_quick_up(&path).await?;
        Ok(true)
    }
}
