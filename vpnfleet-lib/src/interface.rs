//! Brings a VPN network's kernel interface, config file, and firewall
//! rules into existence, and tears them down on removal (§4.3).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::firewall::FirewallOps;
use crate::model::VpnNetwork;
use crate::peer_config;
use crate::platform::PlatformOps;

const LISTEN_PORT: u16 = 51820;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] crate::model::Error),
    #[error(transparent)]
    PeerConfig(#[from] peer_config::Error),
    #[error(transparent)]
    Platform(#[from] crate::platform::Error),
    #[error("failed to write config file {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

pub struct InterfaceManager {
    wg_dir: PathBuf,
    platform: Arc<dyn PlatformOps>,
    firewall: Arc<dyn FirewallOps>,
}

impl InterfaceManager {
    pub fn new(wg_dir: PathBuf, platform: Arc<dyn PlatformOps>, firewall: Arc<dyn FirewallOps>) -> Self {
        Self { wg_dir, platform, firewall }
    }

    pub fn config_path(&self, interface: &str) -> PathBuf {
        self.wg_dir.join(format!("{interface}.conf"))
    }

    /// Derives or recovers the server keypair for `network`: inventory
    /// value, else on-disk recovery, else a freshly generated keypair —
    /// private key first, public key derived from it (§4.3, §9.5: key
    /// material never touches application code).
    pub async fn resolve_private_key(&self, network: &VpnNetwork, path: &Path) -> Result<String, Error> {
        if let Some(key) = &network.server_private_key {
            return Ok(key.clone());
        }
        if let Ok(existing) = tokio::fs::read_to_string(path).await {
            if let Some(key) = peer_config::parse_private_key(&existing) {
                return Ok(key);
            }
        }
        let private_key = self.platform.wg_genkey().await?;
        let public_key = self.platform.wg_pubkey(&private_key).await?;
        tracing::info!(network_id = %network.id, public_key, "generated new server keypair");
        Ok(private_key)
    }

    /// Idempotently ensures the interface's directory entry, firewall
    /// rules, and kernel state exist; returns the interface name. Peer
    /// content itself is the reconciler's Phase B/C responsibility.
    #[tracing::instrument(skip(self, network), fields(network_id = %network.id))]
    pub async fn ensure_interface(&self, network: &VpnNetwork) -> Result<String, Error> {
        let name = network.interface_name();
        let path = self.config_path(&name);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|source| Error::Io { path: path.clone(), source })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).await;
            }
        }

        let config_existed = path.exists();
        let private_key = self.resolve_private_key(network, &path).await?;

        if !config_existed {
            // A brand-new interface gets its sole initial up-cycle from
            // the reconciler's Phase C, once peers have been added to the
            // file; bringing it up here with an empty peer set would just
            // mean cycling it twice.
            let bootstrap = peer_config::render(network, &private_key, &[])?;
            write_atomic(&path, &bootstrap).await?;
        }

        match self.platform.default_egress_interface().await {
            Ok(egress) => {
                if let Err(e) = self.firewall.ensure_rules(&name, LISTEN_PORT, &network.cidr, &egress).await {
                    tracing::warn!(interface = %name, error = %e, "firewall rule install failed, continuing without it");
                }
            }
            Err(e) => tracing::warn!(interface = %name, error = %e, "could not determine default egress interface"),
        }

        if config_existed && !self.platform.interface_exists(&name).await? {
            self.platform.wg_quick_up(&path).await?;
        }

        Ok(name)
    }

    /// Brings the interface down (tolerant of it already being down) and
    /// removes its config file (§4.3 edge case: removal of the last router
    /// in a network tears down the interface entirely).
    #[tracing::instrument(skip(self))]
    pub async fn remove_interface(&self, interface: &str) -> Result<(), Error> {
        let path = self.config_path(interface);
        if let Err(e) = self.platform.wg_quick_down(&path).await {
            tracing::debug!(interface, error = %e, "wg-quick down failed, interface was likely already down");
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(Error::Io { path, source }),
        }
        Ok(())
    }
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), Error> {
    let tmp_path = path.with_extension("conf.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await;
    }
    tokio::fs::rename(&tmp_path, path).await.map_err(|source| Error::Io { path: path.to_path_buf(), source })
}

pub(crate) use write_atomic as write_config_atomic;

/// Writes to a temp file, validates it with `wg-quick strip`, and only
/// then renames it into place (§4.2 Phase B). On validation failure the
/// temp file is discarded and the live config is left untouched.
pub async fn write_validated(platform: &dyn PlatformOps, path: &Path, contents: &str) -> Result<(), Error> {
    let tmp_path = path.with_extension("conf.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await;
    }
    if let Err(e) = platform.wg_quick_strip(&tmp_path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::Platform(e));
    }
    tokio::fs::rename(&tmp_path, path).await.map_err(|source| Error::Io { path: path.to_path_buf(), source })
}
