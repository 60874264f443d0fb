//! Test doubles shared by the integration suites.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use webdriver_agent_launcher_core::builder::BuildDriver;
use webdriver_agent_launcher_core::device::{DeviceControl, LaunchChannels, PreinstalledLaunch};
use webdriver_agent_launcher_core::exec::{CommandRunner, ExecError, ExecOptions, ExecOutput};
use webdriver_agent_launcher_core::proxy::StatusSource;
use webdriver_agent_launcher_core::{LaunchError, StatusSnapshot};

/// Runner for the housekeeping tools: every lookup finds nothing.
#[derive(Debug, Default)]
pub struct QuietRunner {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl CommandRunner for QuietRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _opts: &ExecOptions,
    ) -> Result<ExecOutput, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));
        Err(ExecError::NonZero {
            program: program.to_string(),
            code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Device double that records app management calls.
#[derive(Debug, Default)]
pub struct FakeDevice {
    pub udid: String,
    pub real: bool,
    pub channels: LaunchChannels,
    pub installed: Mutex<Vec<String>>,
    pub listings: Mutex<usize>,
    pub removed: Mutex<Vec<String>>,
    pub launches: Mutex<Vec<(&'static str, PreinstalledLaunch)>>,
    pub terminated: Mutex<Vec<String>>,
}

impl FakeDevice {
    pub fn simulator(udid: &str) -> Self {
        Self {
            udid: udid.to_string(),
            ..Default::default()
        }
    }

    pub fn real(udid: &str, channels: LaunchChannels) -> Self {
        Self {
            udid: udid.to_string(),
            real: true,
            channels,
            ..Default::default()
        }
    }

    pub fn with_installed(self, ids: &[&str]) -> Self {
        *self.installed.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn listings(&self) -> usize {
        *self.listings.lock().unwrap()
    }
}

#[async_trait]
impl DeviceControl for FakeDevice {
    fn udid(&self) -> &str {
        &self.udid
    }

    fn is_real_device(&self) -> bool {
        self.real
    }

    async fn user_installed_bundle_ids_by_name(
        &self,
        _bundle_name: &str,
    ) -> Result<Vec<String>, LaunchError> {
        *self.listings.lock().unwrap() += 1;
        Ok(self.installed.lock().unwrap().clone())
    }

    async fn remove_app(&self, bundle_id: &str) -> Result<(), LaunchError> {
        self.removed.lock().unwrap().push(bundle_id.to_string());
        self.installed.lock().unwrap().retain(|id| id != bundle_id);
        Ok(())
    }

    async fn is_app_installed(&self, bundle_id: &str) -> Result<bool, LaunchError> {
        Ok(self.installed.lock().unwrap().iter().any(|id| id == bundle_id))
    }

    async fn install_app(&self, _app_path: &Path) -> Result<(), LaunchError> {
        Ok(())
    }

    async fn terminate_app(&self, bundle_id: &str) -> Result<(), LaunchError> {
        self.terminated.lock().unwrap().push(bundle_id.to_string());
        Ok(())
    }

    fn launch_channels(&self) -> LaunchChannels {
        self.channels
    }

    async fn launch_modern(&self, launch: &PreinstalledLaunch) -> Result<(), LaunchError> {
        self.launches.lock().unwrap().push(("modern", launch.clone()));
        Ok(())
    }

    async fn launch_app(&self, launch: &PreinstalledLaunch) -> Result<(), LaunchError> {
        self.launches.lock().unwrap().push(("simulator", launch.clone()));
        Ok(())
    }
}

/// Build driver double: records calls, starts instantly.
#[derive(Debug, Clone, Default)]
pub struct FakeBuilder {
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    pub derived_data: Option<PathBuf>,
}

impl FakeBuilder {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| **c == name).count()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }
}

#[async_trait]
impl BuildDriver for FakeBuilder {
    async fn init(&mut self, _status: Arc<dyn StatusSource>) -> Result<(), LaunchError> {
        self.record("init");
        Ok(())
    }

    async fn start(&mut self, build_only: bool) -> Result<Option<StatusSnapshot>, LaunchError> {
        self.record(if build_only { "build" } else { "start" });
        Ok((!build_only).then(StatusSnapshot::default))
    }

    async fn prebuild(&mut self) -> Result<(), LaunchError> {
        self.record("prebuild");
        Ok(())
    }

    async fn quit(&mut self) {
        self.record("quit");
    }

    async fn reset(&mut self) {
        self.record("reset");
    }

    async fn clean_project(&self) -> Result<(), LaunchError> {
        self.record("clean");
        // widen the window in which a second session could race the cleanup
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(())
    }

    async fn retrieve_derived_data_path(&mut self) -> Option<PathBuf> {
        self.derived_data.clone()
    }
}

/// Bootstrap directory with a project folder and a manifest at `version`.
///
/// An existing manifest is left alone so its modification time, and with it
/// the upgrade timestamp, stays stable across calls.
pub fn bootstrap_with_manifest(root: &Path, version: &str) -> PathBuf {
    let bootstrap = root.join("wda");
    std::fs::create_dir_all(bootstrap.join("WebDriverAgent.xcodeproj")).unwrap();
    let manifest = bootstrap.join("package.json");
    if !manifest.exists() {
        std::fs::write(
            &manifest,
            format!(r#"{{"name": "webdriveragent", "version": "{version}"}}"#),
        )
        .unwrap();
    }
    bootstrap
}
