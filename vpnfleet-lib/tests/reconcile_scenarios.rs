//! Integration coverage for the literal scenarios in the reconciler's
//! acceptance criteria (S1-S5) plus the online/offline classification
//! scenario (S6), exercised through fakes for the platform and firewall.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vpnfleet_lib::firewall::FirewallOps;
use vpnfleet_lib::identity_cache::IdentityCache;
use vpnfleet_lib::interface::InterfaceManager;
use vpnfleet_lib::inventory::InventoryClient;
use vpnfleet_lib::monitor::Monitor;
use vpnfleet_lib::ping::PingStats;
use vpnfleet_lib::platform::PlatformOps;
use vpnfleet_lib::reconcile::Reconciler;
use vpnfleet_lib::state;
use wiremock::matchers::{method, path as wpath};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct FakePlatform {
    up_calls: Mutex<Vec<PathBuf>>,
    down_calls: Mutex<Vec<PathBuf>>,
    dump_text: Mutex<String>,
    human_text: Mutex<String>,
    ping_stats: Mutex<PingStats>,
}

#[async_trait]
impl PlatformOps for FakePlatform {
    async fn wg_genkey(&self) -> Result<String, vpnfleet_lib::platform::Error> {
        Ok("SERVERPRIVFAKE".to_string())
    }
    async fn wg_pubkey(&self, _private_key: &str) -> Result<String, vpnfleet_lib::platform::Error> {
        Ok("SERVERPUBFAKE".to_string())
    }
    async fn wg_show_all_dump(&self) -> Result<String, vpnfleet_lib::platform::Error> {
        Ok(self.dump_text.lock().unwrap().clone())
    }
    async fn wg_show(&self, _interface: &str) -> Result<String, vpnfleet_lib::platform::Error> {
        Ok(self.human_text.lock().unwrap().clone())
    }
    async fn wg_quick_up(&self, config_path: &Path) -> Result<(), vpnfleet_lib::platform::Error> {
        self.up_calls.lock().unwrap().push(config_path.to_path_buf());
        Ok(())
    }
    async fn wg_quick_down(&self, config_path: &Path) -> Result<(), vpnfleet_lib::platform::Error> {
        self.down_calls.lock().unwrap().push(config_path.to_path_buf());
        Ok(())
    }
    async fn wg_quick_strip(&self, _config_path: &Path) -> Result<String, vpnfleet_lib::platform::Error> {
        Ok(String::new())
    }
    async fn interface_exists(&self, interface: &str) -> Result<bool, vpnfleet_lib::platform::Error> {
        Ok(self.dump_text.lock().unwrap().contains(interface))
    }
    async fn ping(&self, _ip: &str, _attempts: u32, _t: Duration) -> Result<PingStats, vpnfleet_lib::platform::Error> {
        Ok(*self.ping_stats.lock().unwrap())
    }
    async fn default_egress_interface(&self) -> Result<String, vpnfleet_lib::platform::Error> {
        Ok("eth0".to_string())
    }
}

struct NoopFirewall;

#[async_trait]
impl FirewallOps for NoopFirewall {
    async fn ensure_rules(&self, _i: &str, _p: u16, _c: &str, _e: &str) -> Result<(), vpnfleet_lib::firewall::Error> {
        Ok(())
    }
}

async fn harness(wg_dir: PathBuf) -> (Arc<FakePlatform>, Reconciler, MockServer) {
    let server = MockServer::start().await;
    let inventory = InventoryClient::new(url::Url::parse(&server.uri()).unwrap(), true).unwrap();
    let platform = Arc::new(FakePlatform::default());
    let interfaces = InterfaceManager::new(wg_dir, platform.clone(), Arc::new(NoopFirewall));
    let identity_cache = Arc::new(IdentityCache::new());
    let (writer, _reader) = state::channel();
    let reconciler = Reconciler::new(inventory, interfaces, platform.clone(), identity_cache, writer);
    (platform, reconciler, server)
}

fn snapshot_body() -> serde_json::Value {
    serde_json::json!({
        "vpn_networks": [{"id": "aaaaaaaa-1111-2222-3333-444444444444", "name": "hq", "cidr": "10.100.1.0/24"}],
        "routers": [{
            "id": "r1",
            "name": "branch-a",
            "vpn_network_id": "aaaaaaaa-1111-2222-3333-444444444444",
            "peers": [{"id": "p1", "public_key": "PK1", "allowed_ips": "10.100.1.5/24", "is_enabled": true}]
        }]
    })
}

#[tokio::test]
async fn s1_first_boot_creates_interface_with_expected_config() {
    let dir = tempfile::tempdir().unwrap();
    let (platform, reconciler, server) = harness(dir.path().to_path_buf()).await;
    Mock::given(method("GET"))
        .and(wpath("/api/vpn-servers/ep-1/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_body()))
        .mount(&server)
        .await;

    let report = reconciler.run_pass(Some("ep-1")).await.unwrap();
    assert_eq!(report.created, vec!["wg-aaaaaaaa".to_string()]);
    assert_eq!(platform.up_calls.lock().unwrap().len(), 1);

    let text = tokio::fs::read_to_string(dir.path().join("wg-aaaaaaaa.conf")).await.unwrap();
    assert!(text.contains("Address = 10.100.1.1/24"));
    assert!(text.contains("ListenPort = 51820"));
    assert!(text.contains("AllowedIPs = 10.100.1.5/32"));
}

#[tokio::test]
async fn s2_second_pass_over_unchanged_snapshot_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let (platform, reconciler, server) = harness(dir.path().to_path_buf()).await;
    Mock::given(method("GET"))
        .and(wpath("/api/vpn-servers/ep-1/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_body()))
        .mount(&server)
        .await;

    reconciler.run_pass(Some("ep-1")).await.unwrap();
    platform.up_calls.lock().unwrap().clear();
    platform.down_calls.lock().unwrap().clear();
    *platform.dump_text.lock().unwrap() = "wg-aaaaaaaa\tSERVERPUBFAKE\t51820\toff\n".to_string();

    let report = reconciler.run_pass(Some("ep-1")).await.unwrap();
    assert!(report.created.is_empty());
    assert!(report.files_rebuilt.is_empty());
    assert!(report.interfaces_cycled.is_empty());
    assert!(platform.up_calls.lock().unwrap().is_empty());
    assert!(platform.down_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn s3_vanished_network_is_torn_down() {
    let dir = tempfile::tempdir().unwrap();
    let (platform, reconciler, server) = harness(dir.path().to_path_buf()).await;
    Mock::given(method("GET"))
        .and(wpath("/api/vpn-servers/ep-1/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_body()))
        .mount(&server)
        .await;
    reconciler.run_pass(Some("ep-1")).await.unwrap();
    *platform.dump_text.lock().unwrap() = "wg-aaaaaaaa\tSERVERPUBFAKE\t51820\toff\n".to_string();

    server.reset().await;
    Mock::given(method("GET"))
        .and(wpath("/api/vpn-servers/ep-1/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"vpn_networks": [], "routers": []})))
        .mount(&server)
        .await;

    let report = reconciler.run_pass(Some("ep-1")).await.unwrap();
    assert_eq!(report.removed, vec!["wg-aaaaaaaa".to_string()]);
    assert!(!dir.path().join("wg-aaaaaaaa.conf").exists());
}

#[tokio::test]
async fn s4_404_tears_down_everything() {
    let dir = tempfile::tempdir().unwrap();
    let (platform, reconciler, server) = harness(dir.path().to_path_buf()).await;
    Mock::given(method("GET"))
        .and(wpath("/api/vpn-servers/ep-1/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_body()))
        .mount(&server)
        .await;
    reconciler.run_pass(Some("ep-1")).await.unwrap();
    *platform.dump_text.lock().unwrap() = "wg-aaaaaaaa\tSERVERPUBFAKE\t51820\toff\n".to_string();

    server.reset().await;
    Mock::given(method("GET")).and(wpath("/api/vpn-servers/ep-1/resources")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

    let report = reconciler.run_pass(Some("ep-1")).await.unwrap();
    assert_eq!(report.removed, vec!["wg-aaaaaaaa".to_string()]);
}

#[tokio::test]
async fn s5_transient_failure_skips_the_pass_without_mutating_anything() {
    let dir = tempfile::tempdir().unwrap();
    let (platform, reconciler, _server) = harness(dir.path().to_path_buf()).await;
    // No mock mounted: every request to the unreachable mock server's
    // dropped listener surfaces as a transport error.
    drop(_server);

    let report = reconciler.run_pass(Some("ep-1")).await.unwrap();
    assert!(report.skipped);
    assert!(platform.up_calls.lock().unwrap().is_empty());
    assert!(platform.down_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn s6_online_offline_classification_is_pushed_to_inventory() {
    let dir = tempfile::tempdir().unwrap();
    let (platform, reconciler, server) = harness(dir.path().to_path_buf()).await;
    Mock::given(method("GET"))
        .and(wpath("/api/vpn-servers/ep-1/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_body()))
        .mount(&server)
        .await;
    reconciler.run_pass(Some("ep-1")).await.unwrap();

    let now = chrono::Utc::now().timestamp();
    *platform.dump_text.lock().unwrap() = format!(
        "wg-aaaaaaaa\tSERVERPUBFAKE\t51820\toff\nwg-aaaaaaaa\tPK1\t1.2.3.4:51820\t10.100.1.5/32\t{}\t10\t20\t25\n",
        now - 120
    );

    Mock::given(method("PATCH"))
        .and(wpath("/api/wireguard/peers/p1/stats"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT")).and(wpath("/api/routers/r1")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let monitor_inventory = InventoryClient::new(url::Url::parse(&server.uri()).unwrap(), true).unwrap();
    let (writer, reader) = state::channel();
    writer.publish(vpnfleet_lib::model::ManagedState {
        vpn_networks: vec![vpnfleet_lib::model::VpnNetwork {
            id: "aaaaaaaa-1111-2222-3333-444444444444".to_string(),
            name: "hq".to_string(),
            cidr: "10.100.1.0/24".to_string(),
            dns_servers: None,
            server_endpoint: None,
            server_private_key: None,
            server_public_key: None,
        }],
        routers: vec![vpnfleet_lib::model::Router {
            id: "r1".to_string(),
            name: "branch-a".to_string(),
            vpn_network_id: "aaaaaaaa-1111-2222-3333-444444444444".to_string(),
            peers: vec![vpnfleet_lib::model::Peer {
                id: "p1".to_string(),
                public_key: "PK1".to_string(),
                private_key: None,
                allowed_ips: "10.100.1.5/24".to_string(),
                is_enabled: true,
            }],
        }],
        last_sync_at: Some(chrono::Utc::now()),
    });

    let monitor = Monitor::new(
        reader,
        Arc::new(IdentityCache::new()),
        monitor_inventory,
        platform.clone(),
        dir.path().to_path_buf(),
        1,
        Duration::from_millis(50),
        4,
    );

    let tick = monitor.tick().await.unwrap();
    assert_eq!(tick.probed, 1);
    assert_eq!(tick.online, 1);
    assert_eq!(tick.offline, 0);
}
