//! Agent session orchestrator.
//!
//! [`AgentSupervisor`] decides how the agent comes up for one session and
//! how it goes away again:
//!
//! ```text
//! Created ─┬─ ReuseByUrl ───────────────────────────┐
//!          ├─ PreinstalledLaunch ─┐                 │
//!          ├─ BuildAndLaunch ─────┼─ Ready ─────────┴─ Running ─ Quitting ─ Stopped
//!          └─ AlternateChannelLaunch ┘
//! ```
//!
//! Collaborators are injected: the build driver, the device-control seam, the
//! optional alternate channel, the process tools, and the keyed lock that
//! serializes the upgrade cleanup across sessions sharing a bootstrap path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::builder::{
    poll_readiness, BuildDriver, BuildSettings, Readiness, XcodeBuild, DEFAULT_INTERVAL,
};
use crate::bundle::{find_in_derived_data, parse_bundle_id, simulator_bundle};
use crate::config::{LauncherConfig, SessionArgs};
use crate::device::{AlternateChannel, DeviceControl, PreinstalledLaunch, XctestSession};
use crate::error::LaunchError;
use crate::exec::CommandRunner;
use crate::identity::AgentIdentity;
use crate::lock::KeyedLock;
use crate::process::{CommandFilter, ProcessTools};
use crate::proxy::{self, NoSessionProxy, ProxyError, ProxyOptions, Proxies, StatusSource};
use crate::status::StatusSnapshot;
use crate::store::StateStore;
use crate::upgrade::{cleanup_if_upgraded, upgrade_timestamp, CleanupOutcome, ModuleManifest};
use crate::{DEFAULT_BASE_URL, RUNNER_BUNDLE_ID, RUNNER_BUNDLE_NAME};

/// Timeout of a one-off `/status` query.
pub const STATUS_TIMEOUT: Duration = Duration::from_millis(3000);

/// Bootstrap directory used when none is configured, relative to home.
pub const DEFAULT_BOOTSTRAP_DIR: &str = ".wdal/WebDriverAgent";

const PROJECT_DIR: &str = "WebDriverAgent.xcodeproj";
const XCTEST_PLUGIN: &str = "PlugIns/WebDriverAgentRunner.xctest";
const RUNNER_MARKER: &str = "/WebDriverAgentRunner";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Created,
    ReuseByUrl,
    PreinstalledLaunch,
    BuildAndLaunch,
    AlternateChannelLaunch,
    Ready,
    Running,
    Quitting,
    Stopped,
}

/// Outcome of [`AgentSupervisor::evaluate_cache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// Nothing answered `/status`, or the answer carried no build info.
    NotRunning,
    /// The running instance did not match and was uninstalled.
    Uninstalled { reason: String },
    /// The running instance is adopted; the next launch reuses `url`.
    Reused { url: String },
}

/// Runner bundle prepared for the alternate channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBundle {
    pub app_bundle_id: String,
    pub test_bundle_id: String,
    pub bundle_path: PathBuf,
}

/// Where the agent sources live when the session does not say.
pub fn default_bootstrap_path(home_dir: &Path) -> PathBuf {
    home_dir.join(DEFAULT_BOOTSTRAP_DIR)
}

#[derive(Debug)]
pub struct AgentSupervisor {
    config: LauncherConfig,
    home_dir: PathBuf,
    bootstrap_path: PathBuf,
    agent_path: PathBuf,
    identity: AgentIdentity,
    runner: Arc<dyn CommandRunner>,
    builder: Option<Box<dyn BuildDriver>>,
    device: Arc<dyn DeviceControl>,
    alternate: Option<Arc<dyn AlternateChannel>>,
    processes: ProcessTools,
    lock: KeyedLock,
    /// Caller-supplied URL, or the one adopted by the reuse decision.
    web_driver_agent_url: Option<String>,
    url: Option<Url>,
    proxies: Option<Proxies>,
    xctest_session: Option<Box<dyn XctestSession>>,
    preinstalled_bundle_id: Option<String>,
    state: SupervisorState,
}

impl AgentSupervisor {
    pub fn new(
        config: LauncherConfig,
        home_dir: impl Into<PathBuf>,
        device: Arc<dyn DeviceControl>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let home_dir = home_dir.into();
        let session = &config.session;
        let bootstrap_path = session
            .bootstrap_path
            .clone()
            .unwrap_or_else(|| default_bootstrap_path(&home_dir));
        info!("Using WDA path: '{}'", bootstrap_path.display());
        let agent_path = session
            .agent_path
            .clone()
            .unwrap_or_else(|| bootstrap_path.join(PROJECT_DIR));
        info!("Using WDA agent: '{}'", agent_path.display());

        let identity = AgentIdentity::from_session(session);
        let builder: Option<Box<dyn BuildDriver>> = if can_skip_build(session) {
            None
        } else {
            let settings = BuildSettings::from_config(&config, &bootstrap_path, &agent_path);
            Some(Box::new(XcodeBuild::new(settings, runner.clone())))
        };

        Self {
            web_driver_agent_url: session.web_driver_agent_url.clone(),
            processes: ProcessTools::new(runner.clone()),
            config,
            home_dir,
            bootstrap_path,
            agent_path,
            identity,
            runner,
            builder,
            device,
            alternate: None,
            lock: KeyedLock::shared(),
            url: None,
            proxies: None,
            xctest_session: None,
            preinstalled_bundle_id: None,
            state: SupervisorState::Created,
        }
    }

    /// Replace the build driver. Ignored for sessions that never build.
    pub fn with_builder(mut self, builder: Box<dyn BuildDriver>) -> Self {
        if !can_skip_build(self.session()) {
            self.builder = Some(builder);
        }
        self
    }

    pub fn with_alternate_channel(mut self, channel: Arc<dyn AlternateChannel>) -> Self {
        self.alternate = Some(channel);
        self
    }

    pub fn with_lock(mut self, lock: KeyedLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_processes(mut self, processes: ProcessTools) -> Self {
        self.processes = processes;
        self
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn session(&self) -> &SessionArgs {
        &self.config.session
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn bootstrap_path(&self) -> &Path {
        &self.bootstrap_path
    }

    pub fn agent_path(&self) -> &Path {
        &self.agent_path
    }

    pub fn proxies(&self) -> Option<&Proxies> {
        self.proxies.as_ref()
    }

    /// URL adopted for reuse, or the caller-supplied one.
    pub fn web_driver_agent_url(&self) -> Option<&str> {
        self.web_driver_agent_url.as_deref()
    }

    pub fn fully_started(&self) -> bool {
        matches!(self.state, SupervisorState::Ready | SupervisorState::Running)
    }

    /// Mark the session as driving the agent, or as not started.
    pub fn set_fully_started(&mut self, started: bool) {
        self.state = if started {
            SupervisorState::Running
        } else {
            SupervisorState::Stopped
        };
    }

    /// True when `Resources` or `Resources/WebDriverAgent.bundle` is missing
    /// from the bootstrap path.
    pub fn is_source_fresh(&self) -> bool {
        let resources = self.bootstrap_path.join("Resources");
        !resources.exists() || !resources.join("WebDriverAgent.bundle").exists()
    }

    // ── URL and proxies ─────────────────────────────────────────────────────

    /// The agent URL: the caller-supplied or adopted URL verbatim, otherwise
    /// the base URL's scheme and host with the local port.
    pub fn url(&mut self) -> Result<Url, LaunchError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let url = match &self.web_driver_agent_url {
            Some(raw) => parse_url(raw)?,
            None => {
                let raw_base = self
                    .session()
                    .wda_base_url
                    .as_deref()
                    .unwrap_or(DEFAULT_BASE_URL);
                let base = parse_url(raw_base)?;
                let host = base.host_str().ok_or_else(|| ProxyError::InvalidUrl {
                    url: raw_base.to_string(),
                    reason: "missing host".into(),
                })?;
                parse_url(&format!(
                    "{}://{}:{}",
                    base.scheme(),
                    host,
                    self.session().remote_port()
                ))?
            }
        };
        self.url = Some(url.clone());
        Ok(url)
    }

    /// Path prefix of the agent URL; empty for `/`.
    pub fn base_path(&mut self) -> Result<String, LaunchError> {
        Ok(proxy::base_path(&self.url()?))
    }

    /// Build the no-session client and the session-bound proxy.
    pub fn setup_proxies(&mut self, session_id: Option<String>) -> Result<&Proxies, LaunchError> {
        let url = self.url()?;
        let timeout = Duration::from_millis(self.session().wda_connection_timeout_ms);
        let proxies = proxy::setup_proxies(&url, session_id, timeout, true)?;
        Ok(self.proxies.insert(proxies))
    }

    /// One short `/status` query. Any failure reads as "not running".
    pub async fn get_status(&mut self) -> Option<StatusSnapshot> {
        let url = match self.url() {
            Ok(url) => url,
            Err(e) => {
                debug!("Cannot compose the WDA url: {e}");
                return None;
            }
        };
        let client = ProxyOptions::from_url(&url, STATUS_TIMEOUT, true).and_then(NoSessionProxy::new);
        let client = match client {
            Ok(client) => client,
            Err(e) => {
                debug!("Cannot create a status client for '{url}': {e}");
                return None;
            }
        };
        match client.status(None).await {
            Ok(status) => Some(status),
            Err(e) => {
                debug!("WDA is not listening at '{url}': {e}");
                None
            }
        }
    }

    pub async fn is_running(&mut self) -> bool {
        self.get_status().await.is_some()
    }

    // ── Launch ──────────────────────────────────────────────────────────────

    /// Bring the agent up and return its first status.
    ///
    /// A caller-supplied URL returns whatever a single status query yields,
    /// which may be `None`.
    pub async fn launch(
        &mut self,
        session_id: Option<String>,
    ) -> Result<Option<StatusSnapshot>, LaunchError> {
        if let Some(raw) = self.web_driver_agent_url.clone() {
            info!("Using provided WebDriverAgent at '{raw}'");
            self.state = SupervisorState::ReuseByUrl;
            self.url = Some(parse_url(&raw)?);
            self.setup_proxies(session_id)?;
            let status = self.get_status().await;
            self.state = SupervisorState::Running;
            return Ok(status);
        }

        if self.session().use_preinstalled_wda {
            self.state = SupervisorState::PreinstalledLaunch;
            return self.launch_preinstalled(session_id).await.map(Some);
        }

        let alternate = self.alternate_channel()?;
        self.state = if alternate.is_some() {
            SupervisorState::AlternateChannelLaunch
        } else {
            SupervisorState::BuildAndLaunch
        };
        info!("Launching WebDriverAgent on the device");
        self.setup_proxies(session_id)?;

        let s = self.session();
        if !s.use_xctestrun_file && !self.agent_path.exists() {
            return Err(LaunchError::MissingProject {
                path: self.agent_path.clone(),
            });
        }

        if alternate.is_some()
            || s.use_xctestrun_file
            || (s.derived_data_path.is_some() && s.use_prebuilt_wda)
        {
            info!("Skipped WDA project cleanup according to the provided settings");
        } else {
            let key = KeyedLock::path_key(&self.bootstrap_path);
            self.lock
                .acquire(&key, self.cleanup_project_if_fresh())
                .await;
        }

        // the local port may still be held by an earlier run for this device
        let udid = self.device.udid().to_string();
        self.processes
            .reset_test_processes(&udid, !self.device.is_real_device())
            .await;

        if let Some(channel) = alternate {
            return self.start_with_alternate(channel).await.map(Some);
        }

        let status_source = self.status_source()?;
        let prebuild = self.session().prebuild_wda;
        let builder = self.builder.as_mut().ok_or_else(|| {
            LaunchError::Unsupported("this session has no build driver".into())
        })?;
        builder.init(status_source).await?;
        if prebuild {
            builder.prebuild().await?;
        }
        let status = builder.start(false).await?;
        self.state = SupervisorState::Ready;
        Ok(status)
    }

    fn status_source(&self) -> Result<Arc<dyn StatusSource>, LaunchError> {
        match &self.proxies {
            Some(proxies) => Ok(proxies.no_session.clone()),
            None => Err(LaunchError::Unsupported(
                "proxies must be set up before the agent is started".into(),
            )),
        }
    }

    fn alternate_channel(&self) -> Result<Option<Arc<dyn AlternateChannel>>, LaunchError> {
        if !self.session().use_alternate_channel {
            return Ok(None);
        }
        match &self.alternate {
            Some(channel) => Ok(Some(channel.clone())),
            None => Err(LaunchError::Unsupported(
                "'use_alternate_channel' is set but no alternate device-control channel is configured"
                    .into(),
            )),
        }
    }

    fn runner_env(&self, bundle_id: &str) -> BTreeMap<String, String> {
        let s = self.session();
        let mut env = BTreeMap::new();
        env.insert("USE_PORT".to_string(), s.remote_port().to_string());
        env.insert("WDA_PRODUCT_BUNDLE_IDENTIFIER".to_string(), bundle_id.to_string());
        if let Some(port) = s.mjpeg_server_port {
            env.insert("MJPEG_SERVER_PORT".to_string(), port.to_string());
        }
        env
    }

    async fn launch_preinstalled(
        &mut self,
        session_id: Option<String>,
    ) -> Result<StatusSnapshot, LaunchError> {
        let bundle_id = self.identity.xctest_bundle_id.clone();
        let launch = PreinstalledLaunch {
            env: self.runner_env(&bundle_id),
            bundle_id: bundle_id.clone(),
        };
        info!(bundle_id = %bundle_id, "Launching WebDriverAgent on the device without xcodebuild");

        let channels = self.device.launch_channels();
        if self.device.is_real_device() {
            if channels.modern {
                self.device.launch_modern(&launch).await?;
            } else if channels.xctest_session {
                self.xctest_session = Some(self.device.start_xctest_session(&launch).await?);
            } else {
                return Err(LaunchError::Unsupported(format!(
                    "device {} offers no channel to launch a preinstalled WebDriverAgent",
                    self.device.udid()
                )));
            }
        } else {
            self.device.launch_app(&launch).await?;
        }
        self.preinstalled_bundle_id = Some(bundle_id);

        self.setup_proxies(session_id)?;
        let source = self.status_source()?;
        let timeout_ms = self.session().wda_startup_retry_timeout_ms;
        let interval = Duration::from_millis(self.session().wda_startup_retry_interval_ms);
        let never_exits = AtomicBool::new(false);
        match poll_readiness(source.as_ref(), timeout_ms, interval, &never_exits).await {
            Ok(Readiness::Ready(status)) => {
                self.state = SupervisorState::Ready;
                Ok(status)
            }
            Ok(Readiness::Exited) | Err(LaunchError::ReadinessTimeout { .. }) => {
                Err(LaunchError::PreinstalledNotReady { timeout_ms })
            }
            Err(e) => Err(e),
        }
    }

    async fn start_with_alternate(
        &mut self,
        channel: Arc<dyn AlternateChannel>,
    ) -> Result<StatusSnapshot, LaunchError> {
        info!("Will launch WDA through the alternate device-control channel instead of xcodebuild");
        let prepared = self.prepare_bundle(channel.as_ref()).await?;
        let env = self.runner_env(&self.identity.runner_bundle_id);
        channel
            .run_xcuitest(
                &prepared.app_bundle_id,
                &prepared.app_bundle_id,
                &prepared.test_bundle_id,
                &env,
            )
            .await?;

        let source = self.status_source()?;
        let timeout_ms = self.session().wda_launch_timeout_ms;
        let never_exits = AtomicBool::new(false);
        match poll_readiness(source.as_ref(), timeout_ms, DEFAULT_INTERVAL, &never_exits).await? {
            Readiness::Ready(status) => {
                self.state = SupervisorState::Ready;
                Ok(status)
            }
            Readiness::Exited => Err(LaunchError::ReadinessTimeout { timeout_ms }),
        }
    }

    /// Resolve the runner `.app`, install it when missing, and install its
    /// XCTest bundle through `channel`.
    pub async fn prepare_bundle(
        &mut self,
        channel: &dyn AlternateChannel,
    ) -> Result<PreparedBundle, LaunchError> {
        let bundle_path = match self.session().wda_bundle_path.clone() {
            Some(path) => path,
            None => self.fetch_bundle().await?,
        };
        let app_bundle_id = parse_bundle_id(&bundle_path)?;
        if !self.device.is_app_installed(&app_bundle_id).await? {
            self.device.install_app(&bundle_path).await?;
        }
        let test_bundle_id = channel
            .install_xctest_bundle(&bundle_path.join(XCTEST_PLUGIN))
            .await?;
        Ok(PreparedBundle {
            app_bundle_id,
            test_bundle_id,
            bundle_path,
        })
    }

    async fn fetch_bundle(&mut self) -> Result<PathBuf, LaunchError> {
        if let Some(derived_data) = &self.session().derived_data_path {
            return find_in_derived_data(derived_data);
        }
        let derived_data = self.retrieve_derived_data_path().await;
        simulator_bundle(
            self.runner.as_ref(),
            &self.config.tools.xcodebuild,
            &self.bootstrap_path,
            derived_data.as_deref(),
        )
        .await
    }

    // ── Housekeeping ────────────────────────────────────────────────────────

    /// Clean the project once per upgrade of the agent sources. Never fails.
    pub async fn cleanup_project_if_fresh(&self) -> CleanupOutcome {
        let Some(builder) = self.builder.as_deref() else {
            return CleanupOutcome::Skipped;
        };
        let manifest = match ModuleManifest::read(&self.bootstrap_path) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Cannot read the WebDriverAgent module manifest: {e}");
                return CleanupOutcome::Skipped;
            }
        };
        let store = StateStore::in_home(&self.home_dir, &manifest.name);
        cleanup_if_upgraded(&store, &self.home_dir, &manifest.version, || {
            builder.clean_project()
        })
        .await
    }

    /// Run the project cleanup unconditionally.
    pub async fn clean_project(&self) -> Result<(), LaunchError> {
        match self.builder.as_deref() {
            Some(builder) => builder.clean_project().await,
            None => Err(LaunchError::Unsupported(
                "this session never builds the project".into(),
            )),
        }
    }

    /// Kill runner processes from other devices' sessions that still listen
    /// on this session's port.
    pub async fn cleanup_obsolete_processes(&mut self) {
        let port = match self.url() {
            Ok(url) => url.port_or_known_default().unwrap_or(self.session().remote_port()),
            Err(e) => {
                debug!("Cannot compose the WDA url: {e}");
                return;
            }
        };
        let udid = self.device.udid().to_lowercase();
        let filter = move |cmdline: &str| {
            cmdline.contains(RUNNER_MARKER) && !cmdline.to_lowercase().contains(&udid)
        };
        let pids = self
            .processes
            .listeners_on_port(port, Some(&filter as &CommandFilter))
            .await;
        if pids.is_empty() {
            debug!(
                port,
                "No obsolete cached processes from previous WDA sessions listening on port {port} have been found"
            );
            return;
        }
        info!(
            ?pids,
            "Detected {} obsolete cached process(es) from previous WDA sessions. Cleaning them up",
            pids.len()
        );
        self.processes.signal_pids(&pids, "TERM").await;
    }

    /// Remove every installed runner package from the device. Failures are
    /// logged; an absent package is not an error.
    pub async fn uninstall(&self) {
        let bundle_ids = match self
            .device
            .user_installed_bundle_ids_by_name(RUNNER_BUNDLE_NAME)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!("WebDriverAgent uninstall failed. Perhaps, it is already uninstalled? Original error: {e}");
                return;
            }
        };
        if bundle_ids.is_empty() {
            debug!("No WDAs on the device.");
            return;
        }
        debug!(?bundle_ids, "Uninstalling WDAs");
        for bundle_id in &bundle_ids {
            if let Err(e) = self.device.remove_app(bundle_id).await {
                warn!(bundle_id = %bundle_id, "Cannot uninstall WDA: {e}");
            }
        }
    }

    /// Decide whether an agent already listening at the URL can be reused.
    pub async fn evaluate_cache(&mut self) -> CacheDecision {
        let Some(status) = self.get_status().await.filter(|s| s.build.is_some()) else {
            debug!("WDA is currently not running. There is nothing to cache");
            return CacheDecision::NotRunning;
        };

        let running_id = status.product_bundle_id().map(str::to_string);
        let updated_id = self.identity.updated_bundle_id.clone();
        if let Some(running) = &running_id {
            let mismatch = match &updated_id {
                Some(updated) => (running != updated).then(|| {
                    format!("it has a different bundle id. The actual value is '{running}'")
                }),
                None => (running != RUNNER_BUNDLE_ID).then(|| {
                    format!("its bundle id is not equal to the default value {RUNNER_BUNDLE_ID}")
                }),
            };
            if let Some(reason) = mismatch {
                info!("Will uninstall running WDA since {reason}");
                self.uninstall().await;
                return CacheDecision::Uninstalled { reason };
            }
        }

        let expected = upgrade_timestamp(&self.bootstrap_path);
        debug!("Upgrade timestamp of the currently bundled WDA: {expected:?}");
        debug!("Upgrade timestamp of the WDA on the device: {:?}", status.upgraded_at());
        if let (Some(expected), Some(actual)) = (expected.as_deref(), status.upgraded_at()) {
            if expected.to_lowercase() != actual.to_lowercase() {
                let reason = format!(
                    "it has a different version in comparison to the bundled one ({expected} != {actual})"
                );
                info!("Will uninstall running WDA since {reason}");
                self.uninstall().await;
                return CacheDecision::Uninstalled { reason };
            }
        }

        let url = match self.url() {
            Ok(url) => url,
            Err(e) => {
                debug!("Cannot compose the WDA url: {e}");
                return CacheDecision::NotRunning;
            }
        };
        let port = url.port_or_known_default().unwrap_or_default();
        match &running_id {
            Some(id) => info!("Will reuse previously cached WDA instance at '{url}' with '{id}'"),
            None => info!("Will reuse previously cached WDA instance at '{url}'"),
        }
        info!(
            "Set 'wda_local_port' to a value different from {port} if this is an undesired behavior"
        );
        self.web_driver_agent_url = Some(url.to_string());
        CacheDecision::Reused {
            url: url.to_string(),
        }
    }

    // ── Teardown ────────────────────────────────────────────────────────────

    pub async fn quit(&mut self) {
        self.state = SupervisorState::Quitting;
        let caller_url = self.session().web_driver_agent_url.is_some();

        if self.session().use_preinstalled_wda {
            if let Some(mut session) = self.xctest_session.take() {
                info!("Stopping the XCTest session");
                session.stop().await;
            } else if let Some(bundle_id) = self.preinstalled_bundle_id.take() {
                if let Err(e) = self.device.terminate_app(&bundle_id).await {
                    warn!(bundle_id = %bundle_id, "Cannot terminate WDA: {e}");
                }
            }
        } else if !caller_url {
            info!("Shutting down sub-processes");
            if let Ok(Some(channel)) = self.alternate_channel() {
                channel.stop().await;
            }
            if let Some(builder) = self.builder.as_mut() {
                builder.quit().await;
                builder.reset().await;
            }
        } else {
            debug!(
                "Do not stop xcodebuild nor XCTest session since the WDA session is managed outside of this launcher"
            );
        }

        if let Some(proxies) = self.proxies.as_mut() {
            proxies.session.set_session_id(None);
        }
        if !caller_url {
            // a self-derived url is recomputed by the next launch
            self.web_driver_agent_url = None;
            self.url = None;
        }
        self.state = SupervisorState::Stopped;
    }

    /// Let go of a started agent without stopping it.
    ///
    /// The runner keeps serving at [`Self::url`]; a project identity
    /// rewritten for this session is restored.
    pub async fn detach(&mut self) {
        if let Some(builder) = self.builder.as_mut() {
            builder.reset().await;
        }
        if let Some(proxies) = self.proxies.as_mut() {
            proxies.session.set_session_id(None);
        }
        info!("Detached from WebDriverAgent; it keeps running");
    }

    pub async fn quit_and_uninstall(&mut self) {
        self.quit().await;
        self.uninstall().await;
    }

    /// Derived data root of the build, when this session builds at all.
    pub async fn retrieve_derived_data_path(&mut self) -> Option<PathBuf> {
        self.builder.as_mut()?.retrieve_derived_data_path().await
    }
}

/// Sessions with a caller-supplied URL or a preinstalled runner never build.
fn can_skip_build(session: &SessionArgs) -> bool {
    session.use_preinstalled_wda || session.web_driver_agent_url.is_some()
}

fn parse_url(raw: &str) -> Result<Url, ProxyError> {
    Url::parse(raw).map_err(|e| ProxyError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}
