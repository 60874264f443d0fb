//! Supervised `xcodebuild` subprocess.
//!
//! [`XcodeBuild`] spawns the build tool, feeds its output through an
//! [`OutputClassifier`] inside a monitor task, and confirms readiness by
//! polling `/status`. The monitor task owns the child process; once it has
//! reported an exit the process is never touched again.
//!
//! State machine: `Idle -> Starting -> Running(mode) -> Exited(success|failure)`.

mod command;
mod output;
mod readiness;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::LaunchError;
use crate::exec::{argv, CommandRunner, ExecOptions};
use crate::identity::{prepare_identity, restore_identity};
use crate::process::{terminate_child, DEFAULT_GRACE};
use crate::proxy::StatusSource;
use crate::run_descriptor::{resolve_run_descriptor_path, DescriptorDevice};
use crate::status::StatusSnapshot;
use crate::upgrade::upgrade_timestamp;

pub use command::{
    build_args, build_descriptor, build_env, deployment_target, lib_scheme, runner_scheme,
    BuildDescriptor, BuildSettings,
};
pub use output::{LineVerdict, OutputClassifier, DIAGNOSTIC_LOG_MARKER, ERROR_MARKER, IGNORED_ERRORS};
pub use readiness::{poll_readiness, Readiness, ATTEMPT_TIMEOUT, DEFAULT_INTERVAL};

/// How long to keep reading buffered output after the process exits.
const OUTPUT_DRAIN: Duration = Duration::from_millis(100);

const REAL_DEVICE_HINT: &str = "Make sure you follow the real device setup steps \
    (code signing, provisioning profile, trusted developer) and try to enable 'show_xcode_log' \
    to see the full xcodebuild output.";

const SIMULATOR_HINT: &str = "Try to enable 'show_xcode_log' to see the full xcodebuild output, \
    and check that the selected Xcode supports the simulator runtime.";

/// Contract between the session orchestrator and whatever builds and
/// starts the runner.
#[async_trait]
pub trait BuildDriver: Send + Sync + fmt::Debug {
    /// Prepare identity or run-descriptor state before the first start.
    async fn init(&mut self, status: Arc<dyn StatusSource>) -> Result<(), LaunchError>;

    /// Run the build tool. Build-only runs return `None` once the build has
    /// finished; full launches return the first status the agent reports.
    async fn start(&mut self, build_only: bool) -> Result<Option<StatusSnapshot>, LaunchError>;

    /// Build ahead of the test run; the next `start` only tests.
    async fn prebuild(&mut self) -> Result<(), LaunchError>;

    /// Stop the tracked subprocess, gracefully first.
    async fn quit(&mut self);

    /// Put back anything `init` changed on disk.
    async fn reset(&mut self);

    async fn clean_project(&self) -> Result<(), LaunchError>;

    /// Root of the derived data folder, if it can be determined.
    async fn retrieve_derived_data_path(&mut self) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    BuildAndTest,
    TestOnly,
    BuildOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Idle,
    Starting,
    Running(RunMode),
    Exited { success: bool },
}

/// How the build tool ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// An error marker was seen in the output.
    pub failed: bool,
    /// The exit followed a stop request.
    pub stopped: bool,
    /// Output kept for the failure message.
    pub output: String,
}

impl BuildExit {
    fn lost() -> Self {
        Self {
            code: None,
            signal: None,
            failed: true,
            stopped: false,
            output: "the xcodebuild monitor stopped unexpectedly".into(),
        }
    }

    /// Failure marker, or a non-zero exit that no signal explains.
    pub fn is_failure(&self) -> bool {
        self.failed || (!self.stopped && self.signal.is_none() && self.code != Some(0))
    }
}

struct RunningBuild {
    stop: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<BuildExit>>,
    exited: Arc<AtomicBool>,
    monitor: JoinHandle<()>,
}

/// [`BuildDriver`] backed by `xcodebuild`.
pub struct XcodeBuild {
    settings: BuildSettings,
    runner: Arc<dyn CommandRunner>,
    status: Option<Arc<dyn StatusSource>>,
    xctestrun_path: Option<PathBuf>,
    derived_data: Option<PathBuf>,
    prebuilt: bool,
    agent_ip: Option<String>,
    state: BuilderState,
    running: Option<RunningBuild>,
}

impl fmt::Debug for XcodeBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XcodeBuild")
            .field("udid", &self.settings.udid)
            .field("agent_path", &self.settings.agent_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl XcodeBuild {
    pub fn new(settings: BuildSettings, runner: Arc<dyn CommandRunner>) -> Self {
        let prebuilt = settings.use_prebuilt_wda;
        Self {
            settings,
            runner,
            status: None,
            xctestrun_path: None,
            derived_data: None,
            prebuilt,
            agent_ip: None,
            state: BuilderState::Idle,
            running: None,
        }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub fn state(&self) -> BuilderState {
        if let Some(running) = &self.running {
            if let Some(exit) = running.exit.borrow().as_ref() {
                return BuilderState::Exited {
                    success: !exit.is_failure(),
                };
            }
        }
        self.state
    }

    /// Device address the agent reported in its first status answer.
    pub fn agent_ip(&self) -> Option<&str> {
        self.agent_ip.as_deref()
    }

    pub fn xctestrun_path(&self) -> Option<&Path> {
        self.xctestrun_path.as_deref()
    }

    fn build_failure(&self, exit: BuildExit) -> LaunchError {
        let hint = if self.settings.real_device {
            REAL_DEVICE_HINT
        } else {
            SIMULATOR_HINT
        };
        LaunchError::BuildFailed {
            code: exit.code,
            signal: exit.signal,
            output: exit.output,
            hint: hint.to_string(),
        }
    }

    async fn spawn(&mut self, build_only: bool) -> Result<RunningBuild, LaunchError> {
        let s = &self.settings;
        if !s.use_xctestrun_file && s.real_device {
            if let (Some(path), Some(password)) = (&s.keychain_path, &s.keychain_password) {
                unlock_keychain(self.runner.as_ref(), path, password).await?;
            }
        }

        let timestamp = upgrade_timestamp(&s.bootstrap_path);
        let descriptor = build_descriptor(
            s,
            build_only,
            self.prebuilt,
            self.xctestrun_path.as_deref(),
            timestamp.as_deref(),
        );
        debug!(
            "Beginning {} with command '{} {}' in directory '{}'",
            if build_only { "build" } else { "test" },
            descriptor.program,
            descriptor.args.join(" "),
            s.bootstrap_path.display()
        );
        let log_msg = match s.show_xcode_log {
            Some(true) => "Output from xcodebuild will be logged",
            Some(false) => "Output from xcodebuild will not be logged",
            None => "Output from xcodebuild will only be logged if any errors are present there",
        };
        debug!("{log_msg}. To change this, use the 'show_xcode_log' setting");

        let mut cmd = Command::new(&descriptor.program);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .current_dir(&s.bootstrap_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
        let (line_tx, line_rx) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, line_tx);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let exited = Arc::new(AtomicBool::new(false));
        let monitor = tokio::spawn(monitor_build(
            child,
            line_rx,
            stop_rx,
            exit_tx,
            exited.clone(),
            OutputClassifier::new(s.show_xcode_log),
            s.show_xcode_log,
        ));

        Ok(RunningBuild {
            stop: Some(stop_tx),
            exit: exit_rx,
            exited,
            monitor,
        })
    }
}

#[async_trait]
impl BuildDriver for XcodeBuild {
    async fn init(&mut self, status: Arc<dyn StatusSource>) -> Result<(), LaunchError> {
        self.status = Some(status);
        let s = &self.settings;

        if s.use_xctestrun_file {
            let device = DescriptorDevice {
                udid: &s.udid,
                is_real_device: s.real_device,
                platform_version: &s.platform_version,
                platform_name: s.platform_name,
            };
            let path = resolve_run_descriptor_path(
                &device,
                s.ios_sdk_version.as_deref(),
                &s.bootstrap_path,
                s.remote_port,
            )?;
            self.xctestrun_path = Some(path);
            return Ok(());
        }

        prepare_identity(
            &s.agent_path,
            false,
            s.real_device,
            s.updated_bundle_id.as_deref(),
        )
        .await;
        Ok(())
    }

    async fn start(&mut self, build_only: bool) -> Result<Option<StatusSnapshot>, LaunchError> {
        self.state = BuilderState::Starting;
        let running = match self.spawn(build_only).await {
            Ok(running) => running,
            Err(e) => {
                self.state = BuilderState::Exited { success: false };
                return Err(e);
            }
        };
        let mode = if build_only {
            RunMode::BuildOnly
        } else if self.prebuilt || self.settings.use_xctestrun_file {
            RunMode::TestOnly
        } else {
            RunMode::BuildAndTest
        };
        self.state = BuilderState::Running(mode);

        let mut exit_rx = running.exit.clone();
        let exited = running.exited.clone();
        self.running = Some(running);

        if build_only {
            let exit = wait_exit(&mut exit_rx).await;
            self.running = None;
            let success = !exit.is_failure();
            self.state = BuilderState::Exited { success };
            return if success {
                Ok(None)
            } else {
                Err(self.build_failure(exit))
            };
        }

        let Some(source) = self.status.clone() else {
            return Err(LaunchError::Unsupported(
                "the builder must be initialized before starting the agent".into(),
            ));
        };
        let timeout_ms = self.settings.launch_timeout_ms;
        let mut failure_rx = exit_rx.clone();
        let exit_failure = async move {
            let exit = wait_exit(&mut failure_rx).await;
            if exit.is_failure() {
                exit
            } else {
                std::future::pending().await
            }
        };

        let outcome = tokio::select! {
            exit = exit_failure => Err(self.build_failure(exit)),
            ready = poll_readiness(source.as_ref(), timeout_ms, DEFAULT_INTERVAL, &exited) => ready,
        };

        match outcome {
            Ok(Readiness::Ready(status)) => {
                if let Some(ip) = status.device_ip() {
                    self.agent_ip = Some(ip.to_string());
                }
                if let Ok(pretty) = serde_json::to_string_pretty(&status) {
                    debug!("WebDriverAgent information:\n{pretty}");
                }
                Ok(Some(status))
            }
            Ok(Readiness::Exited) => {
                let exit = wait_exit(&mut exit_rx).await;
                if exit.is_failure() {
                    Err(self.build_failure(exit))
                } else {
                    Err(LaunchError::ReadinessTimeout { timeout_ms })
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn prebuild(&mut self) -> Result<(), LaunchError> {
        debug!("Pre-building WDA before launching test");
        self.prebuilt = true;
        self.start(true).await?;
        if self.settings.prebuild_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.prebuild_delay_ms)).await;
        }
        Ok(())
    }

    async fn quit(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        if let Some(stop) = running.stop.take() {
            // fails when the process already exited; nothing to stop then
            let _ = stop.send(());
        }
        if let Err(e) = (&mut running.monitor).await {
            debug!("xcodebuild monitor task failed: {e}");
        }
        if let Some(exit) = running.exit.borrow().as_ref() {
            self.state = BuilderState::Exited {
                success: !exit.is_failure(),
            };
        }
    }

    async fn reset(&mut self) {
        if self.settings.real_device && self.settings.updated_bundle_id.is_some() {
            restore_identity(&self.settings.agent_path).await;
        }
    }

    async fn clean_project(&self) -> Result<(), LaunchError> {
        let platform = self.settings.platform_name;
        let project = self.settings.agent_path.to_string_lossy().into_owned();
        for scheme in [lib_scheme(platform), runner_scheme(platform)] {
            debug!(
                "Cleaning the project scheme '{scheme}' to make sure there are no leftovers from previous installs"
            );
            let args = argv(["clean", "-project", project.as_str(), "-scheme", scheme]);
            self.runner
                .run(
                    &self.settings.xcodebuild,
                    &args,
                    &ExecOptions::in_dir(&self.settings.bootstrap_path),
                )
                .await?;
        }
        Ok(())
    }

    async fn retrieve_derived_data_path(&mut self) -> Option<PathBuf> {
        if let Some(path) = &self.settings.derived_data_path {
            return Some(path.clone());
        }
        if let Some(path) = &self.derived_data {
            return Some(path.clone());
        }

        let project = self.settings.agent_path.to_string_lossy().into_owned();
        let args = argv(["-project", project.as_str(), "-showBuildSettings"]);
        let stdout = match self
            .runner
            .run(&self.settings.xcodebuild, &args, &ExecOptions::default())
            .await
        {
            Ok(out) => out.stdout,
            Err(e) => {
                warn!("Cannot retrieve WDA build settings. Original error: {e}");
                return None;
            }
        };

        let Some(build_dir) = parse_build_dir(&stdout) else {
            let preview: String = stdout.chars().take(300).collect();
            warn!("Cannot parse WDA build dir from {preview}");
            return None;
        };
        debug!("Parsed BUILD_DIR configuration value: '{}'", build_dir.display());
        // derived data root sits two levels above the build dir
        let root = build_dir.parent()?.parent()?.to_path_buf();
        debug!("Got derived data root: '{}'", root.display());
        self.derived_data = Some(root.clone());
        Some(root)
    }
}

/// `BUILD_DIR` from `xcodebuild -showBuildSettings` output.
pub fn parse_build_dir(stdout: &str) -> Option<PathBuf> {
    let re = Regex::new(r"(?m)^\s*BUILD_DIR\s+=\s+(/.*)$").ok()?;
    let caps = re.captures(stdout)?;
    Some(PathBuf::from(caps[1].trim()))
}

async fn unlock_keychain(
    runner: &dyn CommandRunner,
    keychain: &Path,
    password: &str,
) -> Result<(), LaunchError> {
    let keychain = keychain.to_string_lossy().into_owned();
    let opts = ExecOptions::default();
    runner
        .run("security", &argv(["list-keychains", "-s", keychain.as_str()]), &opts)
        .await?;
    runner
        .run(
            "security",
            &argv(["unlock-keychain", "-p", password, keychain.as_str()]),
            &opts,
        )
        .await?;
    runner
        .run(
            "security",
            &argv(["set-keychain-settings", "-t", "3600", "-l", keychain.as_str()]),
            &opts,
        )
        .await?;
    Ok(())
}

async fn wait_exit(rx: &mut watch::Receiver<Option<BuildExit>>) -> BuildExit {
    match rx.wait_for(Option::is_some).await {
        Ok(exit) => exit.clone().unwrap_or_else(BuildExit::lost),
        Err(_) => BuildExit::lost(),
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

fn handle_line(classifier: &mut OutputClassifier, line: &str) {
    match classifier.classify(line) {
        LineVerdict::Logged => error!(target: "xcodebuild", "{line}"),
        LineVerdict::Quiet => trace!(target: "xcodebuild", "{line}"),
        LineVerdict::Ignored => {}
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

async fn monitor_build(
    mut child: Child,
    mut lines: mpsc::Receiver<String>,
    mut stop: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<BuildExit>>,
    exited: Arc<AtomicBool>,
    mut classifier: OutputClassifier,
    show_log: Option<bool>,
) {
    let mut stopped = false;
    let mut stop_pending = true;
    let status = loop {
        tokio::select! {
            Some(line) = lines.recv() => handle_line(&mut classifier, &line),
            status = child.wait() => break status,
            request = &mut stop, if stop_pending => {
                stop_pending = false;
                // a dropped handle leaves the process running
                if request.is_ok() {
                    stopped = true;
                    if let Err(e) = terminate_child("xcodebuild", &mut child, DEFAULT_GRACE).await {
                        debug!("Cannot stop xcodebuild: {e}");
                    }
                }
            }
        }
    };

    while let Ok(Some(line)) = tokio::time::timeout(OUTPUT_DRAIN, lines.recv()).await {
        handle_line(&mut classifier, &line);
    }

    let (code, signal) = match &status {
        Ok(status) => (status.code(), exit_signal(status)),
        Err(e) => {
            warn!("Cannot read the xcodebuild exit status: {e}");
            (None, None)
        }
    };
    let exit = BuildExit {
        code,
        signal,
        failed: classifier.failed(),
        stopped,
        output: classifier.take_collected(),
    };
    if exit.is_failure() {
        error!(target: "xcodebuild", "xcodebuild exited with code '{code:?}' and signal '{signal:?}'");
    } else {
        info!(target: "xcodebuild", "xcodebuild exited with code '{code:?}' and signal '{signal:?}'");
    }

    if show_log == Some(true) {
        if let Some(location) = classifier.log_location() {
            error!(target: "xcodebuild", "Contents of xcodebuild log file '{}':", location.display());
            match tokio::fs::read_to_string(location).await {
                Ok(contents) => {
                    for line in contents.lines() {
                        error!(target: "xcodebuild", "{line}");
                    }
                }
                Err(e) => error!(target: "xcodebuild", "Unable to access xcodebuild log file: '{e}'"),
            }
        }
    }

    exited.store(true, Ordering::SeqCst);
    exit_tx.send_replace(Some(exit));
}
