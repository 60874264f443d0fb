//! Flags selecting the device and agent, shared by every command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;
use tracing::debug;

use webdriver_agent_launcher_core::config::{
    resolve_config, ConfigOverrides, LauncherConfig, PlatformName,
};
use webdriver_agent_launcher_core::device::{
    DeviceControl, DevicectlDevice, IdbChannel, SimctlDevice,
};
use webdriver_agent_launcher_core::exec::{CommandRunner, SystemCommandRunner};
use webdriver_agent_launcher_core::home::get_home_dir;
use webdriver_agent_launcher_core::AgentSupervisor;

#[derive(Args, Debug, Default, Clone)]
pub struct TargetArgs {
    /// Config file to use instead of the repo-local .wdal.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Device or simulator UDID
    #[arg(long, global = true)]
    pub udid: Option<String>,

    /// Target a physical device instead of a simulator
    #[arg(long, global = true)]
    pub real_device: bool,

    /// iOS or tvOS
    #[arg(long, global = true)]
    pub platform_name: Option<PlatformName>,

    /// Platform version, e.g. 17.2
    #[arg(long, global = true)]
    pub platform_version: Option<String>,

    /// Port the agent listens on
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Use an agent already running at this URL
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Directory holding WebDriverAgent.xcodeproj
    #[arg(long, global = true, value_name = "PATH")]
    pub bootstrap_path: Option<PathBuf>,

    /// Log xcodebuild output (true), never (false); default logs on errors only
    #[arg(long, global = true)]
    pub show_xcode_log: Option<bool>,
}

impl TargetArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            udid: self.udid.clone(),
            real_device: self.real_device.then_some(true),
            platform_name: self.platform_name,
            platform_version: self.platform_version.clone(),
            wda_local_port: self.port,
            web_driver_agent_url: self.url.clone(),
            bootstrap_path: self.bootstrap_path.clone(),
            show_xcode_log: self.show_xcode_log,
        }
    }

    /// Configuration from every layer, with these flags on top.
    pub fn resolve(&self) -> Result<(LauncherConfig, PathBuf)> {
        let home_dir = get_home_dir()?;
        let current_dir = std::env::current_dir()?;
        let config = resolve_config(&self.overrides(), &current_dir, &home_dir)?;
        Ok((config, home_dir))
    }

    /// Supervisor wired to the real tools for the selected device.
    ///
    /// `needs_device` rejects an empty UDID unless an agent URL was given.
    pub fn supervisor(&self, needs_device: bool) -> Result<AgentSupervisor> {
        let (config, home_dir) = self.resolve()?;
        let session = &config.session;
        if needs_device && session.udid.is_empty() && session.web_driver_agent_url.is_none() {
            bail!("no device selected; pass --udid or set WDAL_UDID");
        }

        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        let xcrun = config.tools.xcrun.clone();
        let device: Arc<dyn DeviceControl> = if session.real_device {
            Arc::new(
                DevicectlDevice::new(
                    session.udid.clone(),
                    session.platform_version.clone(),
                    xcrun,
                    runner.clone(),
                )
                .with_xctest_driver(config.tools.xctest.clone()),
            )
        } else {
            Arc::new(SimctlDevice::new(session.udid.clone(), xcrun, runner.clone()))
        };
        debug!(udid = %session.udid, real_device = session.real_device, "selected device");

        let alternate = session.use_alternate_channel.then(|| {
            Arc::new(IdbChannel::new(
                session.udid.clone(),
                config.tools.idb.clone(),
                runner.clone(),
            ))
        });

        let mut supervisor = AgentSupervisor::new(config, home_dir, device, runner);
        if let Some(channel) = alternate {
            supervisor = supervisor.with_alternate_channel(channel);
        }
        Ok(supervisor)
    }
}
