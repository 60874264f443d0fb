//! Configuration types
//!
//! [`SessionArgs`] enumerates every recognized session option with its
//! default. Unknown keys in config files are rejected so typos surface early.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_AGENT_PORT;

fn default_signing_id() -> String {
    "iPhone Developer".to_string()
}

fn default_launch_timeout_ms() -> u64 {
    60_000
}

fn default_connection_timeout_ms() -> u64 {
    240_000
}

fn default_startup_retry_timeout_ms() -> u64 {
    60_000
}

fn default_startup_retry_interval_ms() -> u64 {
    1_000
}

/// Target platform of the device under test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformName {
    #[default]
    #[serde(rename = "iOS", alias = "ios")]
    Ios,
    #[serde(rename = "tvOS", alias = "tvos")]
    Tvos,
}

impl PlatformName {
    pub fn is_tvos(self) -> bool {
        matches!(self, Self::Tvos)
    }
}

impl std::fmt::Display for PlatformName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ios => write!(f, "iOS"),
            Self::Tvos => write!(f, "tvOS"),
        }
    }
}

impl std::str::FromStr for PlatformName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Self::Ios),
            "tvos" => Ok(Self::Tvos),
            other => Err(format!("unknown platform '{other}' (expected iOS or tvOS)")),
        }
    }
}

/// Immutable per-session input to the supervisor.
///
/// # Example `.wdal.toml` section
///
/// ```toml
/// [session]
/// udid = "00008110-000A1C2E0C68801E"
/// real_device = true
/// platform_version = "17.2"
/// updated_wda_bundle_id = "io.example.WebDriverAgentRunner"
/// xcode_org_id = "ABCDE12345"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionArgs {
    /// Device or simulator identifier.
    pub udid: String,
    /// Whether the target is physical hardware.
    pub real_device: bool,
    pub platform_name: PlatformName,
    pub platform_version: String,
    /// SDK version reported by Xcode; keys the `.xctestrun` lookup.
    pub ios_sdk_version: Option<String>,
    /// Host the agent is reachable on (defaults to the base URL host).
    pub host: Option<String>,

    /// Local port the agent is reached on; also the port it listens on.
    pub wda_local_port: Option<u16>,
    /// Scheme and host used to reach the agent.
    pub wda_base_url: Option<String>,
    /// Use an already running agent at this URL; skips every build step.
    pub web_driver_agent_url: Option<String>,

    /// Root directory holding the agent project and resources.
    pub bootstrap_path: Option<PathBuf>,
    /// Path to the `.xcodeproj`; defaults to `<bootstrap>/WebDriverAgent.xcodeproj`.
    pub agent_path: Option<PathBuf>,
    pub derived_data_path: Option<PathBuf>,
    /// Prebuilt runner `.app`, used by the alternate launch channel.
    pub wda_bundle_path: Option<PathBuf>,

    pub use_xctestrun_file: bool,
    pub use_prebuilt_wda: bool,
    pub prebuild_wda: bool,
    pub prebuild_delay_ms: u64,
    pub use_preinstalled_wda: bool,
    /// Launch through the alternate device-control channel (idb).
    pub use_alternate_channel: bool,
    /// Use `build`/`test` instead of `build-for-testing`/`test-without-building`.
    pub use_simple_build_test: bool,

    pub updated_wda_bundle_id: Option<String>,
    /// Suffix appended to the XCTest runner id of a preinstalled agent.
    pub updated_wda_bundle_id_suffix: Option<String>,

    /// `Some(true)` logs all build output, `Some(false)` never logs it,
    /// `None` logs only once an error shows up.
    pub show_xcode_log: Option<bool>,
    pub xcode_config_file: Option<PathBuf>,
    pub xcode_org_id: Option<String>,
    #[serde(default = "default_signing_id")]
    pub xcode_signing_id: String,
    pub keychain_path: Option<PathBuf>,
    pub keychain_password: Option<String>,
    pub allow_provisioning_device_registration: bool,
    pub result_bundle_path: Option<PathBuf>,
    pub result_bundle_version: Option<String>,
    /// Secondary (screen streaming) port passed to the agent.
    pub mjpeg_server_port: Option<u16>,

    #[serde(default = "default_launch_timeout_ms")]
    pub wda_launch_timeout_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub wda_connection_timeout_ms: u64,
    #[serde(default = "default_startup_retry_timeout_ms")]
    pub wda_startup_retry_timeout_ms: u64,
    #[serde(default = "default_startup_retry_interval_ms")]
    pub wda_startup_retry_interval_ms: u64,
}

impl Default for SessionArgs {
    fn default() -> Self {
        Self {
            udid: String::new(),
            real_device: false,
            platform_name: PlatformName::default(),
            platform_version: String::new(),
            ios_sdk_version: None,
            host: None,
            wda_local_port: None,
            wda_base_url: None,
            web_driver_agent_url: None,
            bootstrap_path: None,
            agent_path: None,
            derived_data_path: None,
            wda_bundle_path: None,
            use_xctestrun_file: false,
            use_prebuilt_wda: false,
            prebuild_wda: false,
            prebuild_delay_ms: 0,
            use_preinstalled_wda: false,
            use_alternate_channel: false,
            use_simple_build_test: false,
            updated_wda_bundle_id: None,
            updated_wda_bundle_id_suffix: None,
            show_xcode_log: None,
            xcode_config_file: None,
            xcode_org_id: None,
            xcode_signing_id: default_signing_id(),
            keychain_path: None,
            keychain_password: None,
            allow_provisioning_device_registration: false,
            result_bundle_path: None,
            result_bundle_version: None,
            mjpeg_server_port: None,
            wda_launch_timeout_ms: default_launch_timeout_ms(),
            wda_connection_timeout_ms: default_connection_timeout_ms(),
            wda_startup_retry_timeout_ms: default_startup_retry_timeout_ms(),
            wda_startup_retry_interval_ms: default_startup_retry_interval_ms(),
        }
    }
}

impl SessionArgs {
    /// Port the agent listens on inside the device.
    pub fn remote_port(&self) -> u16 {
        self.wda_local_port.unwrap_or(DEFAULT_AGENT_PORT)
    }
}

/// Names of the external programs the launcher drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub xcodebuild: String,
    pub xcrun: String,
    pub idb: String,
    /// Driver for XCTest sessions on real devices before iOS 17.
    pub xctest: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            xcodebuild: "xcodebuild".to_string(),
            xcrun: "xcrun".to_string(),
            idb: "idb".to_string(),
            xctest: "tidevice".to_string(),
        }
    }
}

/// Complete launcher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    pub session: SessionArgs,
    pub tools: ToolsConfig,
    /// Keep compiler warnings fatal during the agent build.
    pub treat_warnings_as_errors: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_defaults() {
        let args = SessionArgs::default();
        assert_eq!(args.remote_port(), 8100);
        assert_eq!(args.xcode_signing_id, "iPhone Developer");
        assert_eq!(args.wda_launch_timeout_ms, 60_000);
        assert_eq!(args.wda_startup_retry_interval_ms, 1_000);
        assert!(args.show_xcode_log.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: LauncherConfig = toml::from_str(
            r#"
            [session]
            udid = "ABC"
            platform_name = "tvOS"
            wda_local_port = 8200
            "#,
        )
        .unwrap();
        assert_eq!(cfg.session.udid, "ABC");
        assert!(cfg.session.platform_name.is_tvos());
        assert_eq!(cfg.session.remote_port(), 8200);
        assert_eq!(cfg.session.wda_launch_timeout_ms, 60_000);
        assert_eq!(cfg.tools.xcodebuild, "xcodebuild");
        assert_eq!(cfg.tools.xctest, "tidevice");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<LauncherConfig, _> = toml::from_str("[session]\nudidd = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn platform_name_parses_case_insensitively() {
        assert_eq!("IOS".parse::<PlatformName>().unwrap(), PlatformName::Ios);
        assert_eq!("tvos".parse::<PlatformName>().unwrap(), PlatformName::Tvos);
        assert!("android".parse::<PlatformName>().is_err());
    }
}
