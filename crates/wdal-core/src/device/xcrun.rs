//! Device control through `xcrun simctl` (simulators) and `xcrun devicectl`
//! (real devices).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{DeviceControl, LaunchChannels, PreinstalledLaunch, XctestDriver, XctestSession};
use crate::error::LaunchError;
use crate::exec::{CommandRunner, ExecError, ExecOptions};

fn device_error(action: &str, err: ExecError) -> LaunchError {
    LaunchError::DeviceControl(format!("{action}: {err}"))
}

// ── Simulators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimctlDevice {
    udid: String,
    xcrun: String,
    runner: Arc<dyn CommandRunner>,
}

impl SimctlDevice {
    pub fn new(udid: impl Into<String>, xcrun: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            udid: udid.into(),
            xcrun: xcrun.into(),
            runner,
        }
    }

    async fn simctl(&self, args: &[&str], opts: &ExecOptions) -> Result<String, ExecError> {
        let mut argv = vec!["simctl".to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        Ok(self.runner.run(&self.xcrun, &argv, opts).await?.stdout)
    }
}

/// Bundle ids of user apps named `bundle_name` in `simctl listapps` output.
///
/// The output is an old-style property list: one top-level entry per app,
/// each a block of `Key = value;` lines.
pub fn parse_simctl_apps(output: &str, bundle_name: &str) -> Vec<String> {
    let Ok(kv) = Regex::new(r#"^\s*"?([A-Za-z0-9_]+)"?\s*=\s*"?([^";]*)"?;\s*$"#) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut fields: BTreeMap<String, String> = BTreeMap::new();

    for line in output.lines() {
        if depth == 2 && !line.contains('{') {
            if let Some(caps) = kv.captures(line) {
                fields.insert(caps[1].to_string(), caps[2].to_string());
            }
        }
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    if depth == 2 {
                        fields.clear();
                    }
                }
                '}' => {
                    if depth == 2 {
                        let is_user = fields.get("ApplicationType").map(String::as_str) == Some("User");
                        let name_matches = fields.get("CFBundleName").map(String::as_str) == Some(bundle_name);
                        if is_user && name_matches {
                            if let Some(id) = fields.get("CFBundleIdentifier") {
                                found.push(id.clone());
                            }
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            }
        }
    }
    found
}

#[async_trait]
impl DeviceControl for SimctlDevice {
    fn udid(&self) -> &str {
        &self.udid
    }

    fn is_real_device(&self) -> bool {
        false
    }

    async fn user_installed_bundle_ids_by_name(&self, bundle_name: &str) -> Result<Vec<String>, LaunchError> {
        let stdout = self
            .simctl(&["listapps", &self.udid], &ExecOptions::default())
            .await
            .map_err(|e| device_error("listing simulator apps", e))?;
        Ok(parse_simctl_apps(&stdout, bundle_name))
    }

    async fn remove_app(&self, bundle_id: &str) -> Result<(), LaunchError> {
        self.simctl(&["uninstall", &self.udid, bundle_id], &ExecOptions::default())
            .await
            .map(drop)
            .map_err(|e| device_error("uninstalling app", e))
    }

    async fn is_app_installed(&self, bundle_id: &str) -> Result<bool, LaunchError> {
        match self
            .simctl(&["get_app_container", &self.udid, bundle_id], &ExecOptions::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(ExecError::NonZero { .. }) => Ok(false),
            Err(e) => Err(device_error("checking app container", e)),
        }
    }

    async fn install_app(&self, app_path: &Path) -> Result<(), LaunchError> {
        let path = app_path.to_string_lossy();
        self.simctl(&["install", &self.udid, &path], &ExecOptions::default())
            .await
            .map(drop)
            .map_err(|e| device_error("installing app", e))
    }

    async fn terminate_app(&self, bundle_id: &str) -> Result<(), LaunchError> {
        self.simctl(&["terminate", &self.udid, bundle_id], &ExecOptions::default())
            .await
            .map(drop)
            .map_err(|e| device_error("terminating app", e))
    }

    async fn launch_app(&self, launch: &PreinstalledLaunch) -> Result<(), LaunchError> {
        // simctl forwards SIMCTL_CHILD_-prefixed variables to the app
        let mut opts = ExecOptions::default();
        for (key, value) in &launch.env {
            opts.env.insert(format!("SIMCTL_CHILD_{key}"), value.clone());
        }
        self.simctl(
            &["launch", "--terminate-running-process", &self.udid, &launch.bundle_id],
            &opts,
        )
        .await
        .map(drop)
        .map_err(|e| device_error("launching app", e))
    }
}

// ── Real devices ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DevicectlOutput<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct AppsResult {
    #[serde(default)]
    apps: Vec<AppEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppEntry {
    bundle_identifier: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessesResult {
    #[serde(default)]
    running_processes: Vec<ProcessEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessEntry {
    #[serde(default)]
    executable: Option<String>,
    process_identifier: u32,
}

/// Real device driven through `xcrun devicectl`.
#[derive(Debug, Clone)]
pub struct DevicectlDevice {
    udid: String,
    platform_version: String,
    xcrun: String,
    runner: Arc<dyn CommandRunner>,
    xctest: Option<XctestDriver>,
}

impl DevicectlDevice {
    pub fn new(
        udid: impl Into<String>,
        platform_version: impl Into<String>,
        xcrun: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            udid: udid.into(),
            platform_version: platform_version.into(),
            xcrun: xcrun.into(),
            runner,
            xctest: None,
        }
    }

    /// Offer the XCTest session channel through `program` on devices that
    /// lack the modern launch call.
    pub fn with_xctest_driver(mut self, program: impl Into<String>) -> Self {
        self.xctest = Some(XctestDriver::new(program, self.udid.clone()));
        self
    }

    fn has_modern_launch(&self) -> bool {
        self.major_version().is_some_and(|major| major >= 17)
    }

    fn major_version(&self) -> Option<u32> {
        self.platform_version.split('.').next()?.trim().parse().ok()
    }

    async fn devicectl(&self, args: &[&str]) -> Result<String, ExecError> {
        let mut argv = vec!["devicectl".to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        Ok(self
            .runner
            .run(&self.xcrun, &argv, &ExecOptions::default())
            .await?
            .stdout)
    }

    /// Run a devicectl query whose answer is written to a JSON file.
    async fn devicectl_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T, LaunchError> {
        // removed on drop
        let output = tempfile::Builder::new()
            .prefix("wdal-devicectl-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| LaunchError::io(std::env::temp_dir(), e))?;
        let output_arg = output.path().to_string_lossy().into_owned();
        let mut full: Vec<&str> = args.to_vec();
        full.extend(["--json-output", output_arg.as_str()]);

        self.devicectl(&full)
            .await
            .map_err(|e| device_error("querying device", e))?;

        let contents = tokio::fs::read_to_string(output.path())
            .await
            .map_err(|e| LaunchError::io(output.path(), e))?;
        let parsed: DevicectlOutput<T> = serde_json::from_str(&contents)
            .map_err(|e| LaunchError::DeviceControl(format!("unexpected devicectl output: {e}")))?;
        Ok(parsed.result)
    }

    async fn apps(&self, bundle_id: Option<&str>) -> Result<Vec<AppEntry>, LaunchError> {
        let mut args = vec!["device", "info", "apps", "--device", self.udid.as_str()];
        if let Some(bundle_id) = bundle_id {
            args.extend(["--bundle-id", bundle_id]);
        }
        let result: AppsResult = self.devicectl_json(&args).await?;
        Ok(result.apps)
    }
}

#[async_trait]
impl DeviceControl for DevicectlDevice {
    fn udid(&self) -> &str {
        &self.udid
    }

    fn is_real_device(&self) -> bool {
        true
    }

    async fn user_installed_bundle_ids_by_name(&self, bundle_name: &str) -> Result<Vec<String>, LaunchError> {
        Ok(self
            .apps(None)
            .await?
            .into_iter()
            .filter(|app| app.name.as_deref() == Some(bundle_name))
            .map(|app| app.bundle_identifier)
            .collect())
    }

    async fn remove_app(&self, bundle_id: &str) -> Result<(), LaunchError> {
        self.devicectl(&["device", "uninstall", "app", "--device", &self.udid, bundle_id])
            .await
            .map(drop)
            .map_err(|e| device_error("uninstalling app", e))
    }

    async fn is_app_installed(&self, bundle_id: &str) -> Result<bool, LaunchError> {
        Ok(self
            .apps(Some(bundle_id))
            .await?
            .iter()
            .any(|app| app.bundle_identifier == bundle_id))
    }

    async fn install_app(&self, app_path: &Path) -> Result<(), LaunchError> {
        let path = app_path.to_string_lossy();
        self.devicectl(&["device", "install", "app", "--device", &self.udid, &path])
            .await
            .map(drop)
            .map_err(|e| device_error("installing app", e))
    }

    async fn terminate_app(&self, bundle_id: &str) -> Result<(), LaunchError> {
        let Some(app_url) = self
            .apps(Some(bundle_id))
            .await?
            .into_iter()
            .find(|app| app.bundle_identifier == bundle_id)
            .and_then(|app| app.url)
        else {
            debug!(bundle_id, "app is not installed; nothing to terminate");
            return Ok(());
        };

        let processes: ProcessesResult = self
            .devicectl_json(&["device", "info", "processes", "--device", &self.udid])
            .await?;
        let app_url = app_url.trim_end_matches('/');
        for process in processes.running_processes {
            let matches = process
                .executable
                .as_deref()
                .is_some_and(|exe| exe.starts_with(app_url));
            if matches {
                let pid = process.process_identifier.to_string();
                self.devicectl(&["device", "process", "terminate", "--device", &self.udid, "--pid", &pid])
                    .await
                    .map_err(|e| device_error("terminating app", e))?;
            }
        }
        Ok(())
    }

    fn launch_channels(&self) -> LaunchChannels {
        let modern = self.has_modern_launch();
        LaunchChannels {
            modern,
            xctest_session: !modern && self.xctest.is_some(),
        }
    }

    async fn launch_modern(&self, launch: &PreinstalledLaunch) -> Result<(), LaunchError> {
        let env = serde_json::to_string(&launch.env)
            .map_err(|e| LaunchError::DeviceControl(format!("encoding launch environment: {e}")))?;
        self.devicectl(&[
            "device",
            "process",
            "launch",
            "--device",
            &self.udid,
            "--terminate-existing",
            "--environment-variables",
            &env,
            &launch.bundle_id,
        ])
        .await
        .map(drop)
        .map_err(|e| device_error("launching app", e))
    }

    async fn start_xctest_session(
        &self,
        launch: &PreinstalledLaunch,
    ) -> Result<Box<dyn XctestSession>, LaunchError> {
        let Some(driver) = &self.xctest else {
            return Err(LaunchError::Unsupported(format!(
                "device {} has no XCTest session channel",
                self.udid
            )));
        };
        let session = driver.start(launch).await?;
        Ok(Box::new(session))
    }
}
