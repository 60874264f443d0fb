//! Reuse decision for an agent already listening on the session's port.

mod common;

use std::sync::Arc;

use common::{bootstrap_with_manifest, FakeDevice, QuietRunner};
use serde_json::json;
use tempfile::TempDir;
use webdriver_agent_launcher_core::agent::CacheDecision;
use webdriver_agent_launcher_core::device::LaunchChannels;
use webdriver_agent_launcher_core::upgrade::upgrade_timestamp;
use webdriver_agent_launcher_core::{AgentSupervisor, LauncherConfig, SessionArgs, RUNNER_BUNDLE_ID};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INSTALLED: &str = "com.facebook.WebDriverAgentRunner.xctrunner";

async fn agent_answering(build: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": {"state": "success", "build": build},
            "sessionId": null
        })))
        .mount(&server)
        .await;
    server
}

fn supervisor(
    home: &TempDir,
    server: &MockServer,
    device: Arc<FakeDevice>,
    updated_bundle_id: Option<&str>,
) -> AgentSupervisor {
    let config = LauncherConfig {
        session: SessionArgs {
            udid: device.udid.clone(),
            real_device: device.real,
            bootstrap_path: Some(bootstrap_with_manifest(home.path(), "2.0.0")),
            wda_base_url: Some("http://127.0.0.1".into()),
            wda_local_port: Some(server.address().port()),
            updated_wda_bundle_id: updated_bundle_id.map(str::to_string),
            ..Default::default()
        },
        ..Default::default()
    };
    AgentSupervisor::new(config, home.path(), device, Arc::new(QuietRunner::default()))
}

#[tokio::test]
async fn matching_instance_is_reused() {
    let home = TempDir::new().unwrap();
    let bootstrap = bootstrap_with_manifest(home.path(), "2.0.0");
    let timestamp = upgrade_timestamp(&bootstrap).unwrap();
    let server = agent_answering(json!({
        "productBundleIdentifier": RUNNER_BUNDLE_ID,
        "upgradedAt": timestamp
    }))
    .await;
    let device = Arc::new(FakeDevice::simulator("SIM-1").with_installed(&[INSTALLED]));
    let mut sup = supervisor(&home, &server, device.clone(), None);

    let expected = format!("http://127.0.0.1:{}/", server.address().port());
    assert_eq!(
        sup.evaluate_cache().await,
        CacheDecision::Reused {
            url: expected.clone()
        }
    );
    assert_eq!(sup.web_driver_agent_url(), Some(expected.as_str()));
    assert_eq!(device.listings(), 0);
    assert!(device.removed().is_empty());
}

#[tokio::test]
async fn numeric_upgrade_timestamp_is_compared_as_text() {
    let home = TempDir::new().unwrap();
    let bootstrap = bootstrap_with_manifest(home.path(), "2.0.0");
    let timestamp: u64 = upgrade_timestamp(&bootstrap).unwrap().parse().unwrap();
    let server = agent_answering(json!({
        "productBundleIdentifier": RUNNER_BUNDLE_ID,
        "upgradedAt": timestamp
    }))
    .await;
    let device = Arc::new(FakeDevice::simulator("SIM-1"));
    let mut sup = supervisor(&home, &server, device.clone(), None);

    assert!(matches!(sup.evaluate_cache().await, CacheDecision::Reused { .. }));
}

#[tokio::test]
async fn stale_timestamp_uninstalls_exactly_once() {
    let home = TempDir::new().unwrap();
    let server = agent_answering(json!({
        "productBundleIdentifier": RUNNER_BUNDLE_ID,
        "upgradedAt": "1"
    }))
    .await;
    let device = Arc::new(FakeDevice::simulator("SIM-1").with_installed(&[INSTALLED]));
    let mut sup = supervisor(&home, &server, device.clone(), None);

    assert!(matches!(
        sup.evaluate_cache().await,
        CacheDecision::Uninstalled { .. }
    ));
    assert_eq!(device.listings(), 1);
    assert_eq!(device.removed(), vec![INSTALLED.to_string()]);
    assert_eq!(sup.web_driver_agent_url(), None);
}

#[tokio::test]
async fn non_default_bundle_on_simulator_is_uninstalled() {
    let home = TempDir::new().unwrap();
    let server = agent_answering(json!({"productBundleIdentifier": "io.example.other"})).await;
    let device = Arc::new(FakeDevice::simulator("SIM-1").with_installed(&[INSTALLED]));
    let mut sup = supervisor(&home, &server, device.clone(), None);

    match sup.evaluate_cache().await {
        CacheDecision::Uninstalled { reason } => assert!(reason.contains(RUNNER_BUNDLE_ID)),
        other => panic!("unexpected decision: {other:?}"),
    }
    assert_eq!(device.removed().len(), 1);
}

#[tokio::test]
async fn custom_bundle_mismatch_on_real_device_is_uninstalled() {
    let home = TempDir::new().unwrap();
    let server = agent_answering(json!({"productBundleIdentifier": RUNNER_BUNDLE_ID})).await;
    let device = Arc::new(
        FakeDevice::real("REAL-1", LaunchChannels::default()).with_installed(&["io.example.wda.xctrunner"]),
    );
    let mut sup = supervisor(&home, &server, device.clone(), Some("io.example.wda"));

    assert!(matches!(
        sup.evaluate_cache().await,
        CacheDecision::Uninstalled { .. }
    ));
    assert_eq!(device.removed(), vec!["io.example.wda.xctrunner".to_string()]);
}

#[tokio::test]
async fn unreachable_agent_is_not_cached() {
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let device = Arc::new(FakeDevice::simulator("SIM-1"));
    let mut sup = supervisor(&home, &server, device.clone(), None);

    assert_eq!(sup.evaluate_cache().await, CacheDecision::NotRunning);
    assert!(!sup.is_running().await);
    assert_eq!(device.listings(), 0);
}

#[tokio::test]
async fn adopted_url_is_dropped_on_quit() {
    let home = TempDir::new().unwrap();
    let bootstrap = bootstrap_with_manifest(home.path(), "2.0.0");
    let server = agent_answering(json!({
        "productBundleIdentifier": RUNNER_BUNDLE_ID,
        "upgradedAt": upgrade_timestamp(&bootstrap).unwrap()
    }))
    .await;
    let device = Arc::new(FakeDevice::simulator("SIM-1"));
    let mut sup = supervisor(&home, &server, device, None);

    assert!(matches!(sup.evaluate_cache().await, CacheDecision::Reused { .. }));
    let status = sup.launch(Some("abc".into())).await.unwrap().unwrap();
    assert_eq!(status.product_bundle_id(), Some(RUNNER_BUNDLE_ID));
    assert_eq!(sup.proxies().unwrap().session.session_id(), Some("abc"));

    sup.quit().await;
    assert_eq!(sup.web_driver_agent_url(), None);
    assert_eq!(sup.proxies().unwrap().session.session_id(), None);
}
