//! Integration tests for the wdal command surface

use assert_cmd::cargo;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn wdal(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo::cargo_bin_cmd!("wdal");
    cmd.env("WDAL_HOME", home)
        .current_dir(home)
        .env_remove("WDAL_UDID")
        .env_remove("WDAL_WEB_DRIVER_AGENT_URL")
        .env_remove("WDAL_BOOTSTRAP_PATH")
        .env_remove("WDAL_WDA_LOCAL_PORT")
        .env_remove("WDAL_LOG");
    cmd
}

fn write_lib_manifest(root: &Path, version: &str) -> std::path::PathBuf {
    let dir = root.join("WebDriverAgentLib");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("Info.plist");
    let mut dict = plist::Dictionary::new();
    dict.insert(
        "CFBundleShortVersionString".into(),
        plist::Value::String(version.into()),
    );
    dict.insert("CFBundleVersion".into(), plist::Value::String(version.into()));
    plist::Value::Dictionary(dict).to_file_xml(&path).unwrap();
    path
}

async fn status_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": {
                "state": "success",
                "ios": {"ip": "10.0.0.7"},
                "build": {
                    "productBundleIdentifier": "com.facebook.WebDriverAgentRunner",
                    "upgradedAt": "1700000000000"
                }
            },
            "sessionId": null
        })))
        .mount(&server)
        .await;
    server
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    wdal(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("launch"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("bump-version"))
        .stdout(predicate::str::contains("fetch-prebuilt"));
}

#[test]
fn test_bump_version_rejects_invalid_version() {
    let home = TempDir::new().unwrap();
    let manifest = write_lib_manifest(home.path(), "1.0.0");
    wdal(home.path())
        .args(["bump-version", "one.two"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid version specified 'one.two'"));

    let value = plist::Value::from_file(&manifest).unwrap();
    let dict = value.as_dictionary().unwrap();
    assert_eq!(
        dict.get("CFBundleVersion").and_then(plist::Value::as_string),
        Some("1.0.0")
    );
}

#[test]
fn test_bump_version_rewrites_lib_manifest() {
    let home = TempDir::new().unwrap();
    let project = home.path().join("agent");
    let manifest = write_lib_manifest(&project, "1.0.0");

    wdal(home.path())
        .args(["bump-version", "4.2.0", "--project-root"])
        .arg(&project)
        .assert()
        .success();

    let value = plist::Value::from_file(&manifest).unwrap();
    let dict = value.as_dictionary().unwrap();
    for key in ["CFBundleShortVersionString", "CFBundleVersion"] {
        assert_eq!(dict.get(key).and_then(plist::Value::as_string), Some("4.2.0"));
    }
}

#[test]
fn test_bump_version_missing_manifest_fails() {
    let home = TempDir::new().unwrap();
    wdal(home.path())
        .args(["bump-version", "1.2.3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn test_status_unreachable_agent_fails() {
    let home = TempDir::new().unwrap();
    wdal(home.path())
        .args(["status", "--url", "http://127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no WebDriverAgent answered"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_prints_running_agent() {
    let server = status_server().await;
    let home = TempDir::new().unwrap();
    wdal(home.path())
        .args(["status", "--url", &server.uri()])
        .assert()
        .success()
        .stdout(predicate::str::contains("state:     success"))
        .stdout(predicate::str::contains("device ip: 10.0.0.7"))
        .stdout(predicate::str::contains("com.facebook.WebDriverAgentRunner"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_launch_with_url_uses_running_agent() {
    let server = status_server().await;
    let home = TempDir::new().unwrap();
    wdal(home.path())
        .args(["launch", "--no-wait", "--json", "--url", &server.uri()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\":\"success\""));
}

#[test]
fn test_launch_without_device_fails() {
    let home = TempDir::new().unwrap();
    wdal(home.path())
        .args(["launch", "--no-wait"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no device selected"));
}

#[test]
fn test_clean_if_upgraded_records_fresh_install() {
    let home = TempDir::new().unwrap();
    let bootstrap = home.path().join("wda");
    fs::create_dir_all(bootstrap.join("WebDriverAgent.xcodeproj")).unwrap();
    fs::write(
        bootstrap.join("package.json"),
        r#"{"name":"webdriveragent","version":"7.1.0"}"#,
    )
    .unwrap();

    wdal(home.path())
        .args(["clean", "--if-upgraded", "--bootstrap-path"])
        .arg(&bootstrap)
        .assert()
        .success()
        .stdout(predicate::str::contains("fresh install"));

    wdal(home.path())
        .args(["clean", "--if-upgraded", "--bootstrap-path"])
        .arg(&bootstrap)
        .assert()
        .success()
        .stdout(predicate::str::contains("Up to date (recorded 7.1.0)"));
}

async fn release_server(asset_status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/appium/webdriveragent/releases/tags/v9.1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tag_name": "v9.1.0",
            "assets": [
                {"browser_download_url": format!("{}/download/WebDriverAgentRunner-Runner.zip", server.uri())}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download/WebDriverAgentRunner-Runner.zip"))
        .respond_with(ResponseTemplate::new(asset_status).set_body_bytes(b"PK\x03\x04".to_vec()))
        .mount(&server)
        .await;
    server
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_prebuilt_downloads_release_assets() {
    let server = release_server(200).await;
    let home = TempDir::new().unwrap();
    let output = home.path().join("prebuilt-agents");

    wdal(home.path())
        .args(["fetch-prebuilt", "--version", "9.1.0", "--api-url", &server.uri(), "--output"])
        .arg(&output)
        .assert()
        .success();

    let archive = fs::read(output.join("WebDriverAgentRunner-Runner.zip")).unwrap();
    assert_eq!(archive, b"PK\x03\x04");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_prebuilt_fails_on_missing_asset() {
    let server = release_server(404).await;
    let home = TempDir::new().unwrap();
    let output = home.path().join("prebuilt-agents");

    wdal(home.path())
        .args(["fetch-prebuilt", "--version", "9.1.0", "--api-url", &server.uri(), "--output"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to download"))
        .stderr(predicate::str::contains("404"));

    assert!(!output.join("WebDriverAgentRunner-Runner.zip").exists());
}
