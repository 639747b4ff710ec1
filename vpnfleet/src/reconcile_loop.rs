//! Periodic reconcile trigger: runs once immediately, then on a fixed
//! interval until cancelled (§5).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vpnfleet_lib::Reconciler;

pub async fn run(reconciler: Arc<Reconciler>, endpoint_id: Option<String>, interval: Duration, cancel: CancellationToken) {
    loop {
        match reconciler.run_pass(endpoint_id.as_deref()).await {
            Ok(report) => tracing::info!(%report, "reconcile pass complete"),
            Err(e) => tracing::error!(error = %e, "reconcile pass failed to converge"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                tracing::debug!("reconcile loop stopping");
                break;
            }
        }
    }
}
