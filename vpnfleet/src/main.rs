mod cli;
mod monitor_loop;
mod reconcile_loop;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use vpnfleet_lib::firewall::IptablesFirewall;
use vpnfleet_lib::identity_cache::IdentityCache;
use vpnfleet_lib::interface::InterfaceManager;
use vpnfleet_lib::inventory::InventoryClient;
use vpnfleet_lib::platform::RealPlatform;
use vpnfleet_lib::{state, Monitor, Reconciler, Settings};

#[cfg(target_os = "linux")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    vpnfleet_lib::logging::init();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting vpnfleet");

    let cli = cli::Cli::parse();
    let settings: Settings = cli.into();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start tokio runtime");
            std::process::exit(exitcode::OSERR);
        }
    };

    if let Err(e) = runtime.block_on(run(settings)) {
        tracing::error!(error = %e, "vpnfleet exited with an error");
        std::process::exit(exitcode::SOFTWARE);
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let platform = Arc::new(RealPlatform);
    let firewall = Arc::new(IptablesFirewall::new());
    let identity_cache = Arc::new(IdentityCache::new());
    warm_identity_cache(&identity_cache, &settings.wireguard_config_dir).await;

    let interfaces = InterfaceManager::new(settings.wireguard_config_dir.clone(), platform.clone(), firewall);
    let inventory = InventoryClient::new(settings.api_base_url.clone(), settings.verify_tls)?;
    let monitor_inventory = InventoryClient::new(settings.api_base_url.clone(), settings.verify_tls)?;

    let (state_writer, state_reader) = state::channel();
    let reconciler = Arc::new(Reconciler::new(inventory, interfaces, platform.clone(), identity_cache.clone(), state_writer));
    let monitor = Arc::new(Monitor::new(
        state_reader,
        identity_cache,
        monitor_inventory,
        platform,
        settings.wireguard_config_dir.clone(),
        settings.ping_attempts,
        settings.ping_timeout,
        settings.max_concurrent_pings,
    ));

    let cancel = CancellationToken::new();

    let reconcile_handle = tokio::spawn(reconcile_loop::run(
        reconciler,
        settings.vpn_server_endpoint.clone(),
        settings.sync_interval,
        cancel.clone(),
    ));
    let monitor_handle = tokio::spawn(monitor_loop::run(monitor, settings.monitor_interval, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping loops");
    cancel.cancel();

    let _ = tokio::join!(reconcile_handle, monitor_handle);
    Ok(())
}

async fn warm_identity_cache(cache: &IdentityCache, wireguard_config_dir: &std::path::Path) {
    let mut entries = match tokio::fs::read_dir(wireguard_config_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(path = %wireguard_config_dir.display(), error = %e, "no existing config directory to warm identity cache from");
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("conf") {
            continue;
        }
        if let Ok(text) = tokio::fs::read_to_string(&path).await {
            cache.warm_from_config_text(&text);
        }
    }
    tracing::info!(entries = cache.len(), "identity cache warmed from on-disk config files");
}
