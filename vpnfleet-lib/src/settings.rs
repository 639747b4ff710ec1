//! Resolved configuration consumed by the library. The binary crate is
//! responsible for turning CLI/env input into this plain struct (§9.4).

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Absent means "own nothing"; not a hard startup error (§6).
    pub vpn_server_endpoint: Option<String>,
    pub api_base_url: Url,
    pub sync_interval: Duration,
    pub monitor_interval: Duration,
    pub ping_attempts: u32,
    pub ping_timeout: Duration,
    pub max_concurrent_pings: usize,
    pub wireguard_config_dir: PathBuf,
    pub verify_tls: bool,
}
