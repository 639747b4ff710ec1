//! Periodic liveness-monitor trigger, independent of the reconcile loop
//! (§5: the two loops never block on each other).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vpnfleet_lib::Monitor;

pub async fn run(monitor: Arc<Monitor>, interval: Duration, cancel: CancellationToken) {
    loop {
        match monitor.tick().await {
            Ok(tick) => tracing::info!(%tick, "monitor tick complete"),
            Err(e) => tracing::warn!(error = %e, "monitor tick failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                tracing::debug!("monitor loop stopping");
                break;
            }
        }
    }
}
