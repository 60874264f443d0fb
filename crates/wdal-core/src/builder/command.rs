//! `xcodebuild` command line and environment for one launch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::config::{LauncherConfig, PlatformName};
use crate::RUNNER_BUNDLE_ID;

pub const RUNNER_SCHEME_IOS: &str = "WebDriverAgentRunner";
pub const LIB_SCHEME_IOS: &str = "WebDriverAgentLib";
pub const RUNNER_SCHEME_TV: &str = "WebDriverAgentRunner_tvOS";
pub const LIB_SCHEME_TV: &str = "WebDriverAgentLib_tvOS";

pub fn runner_scheme(platform: PlatformName) -> &'static str {
    if platform.is_tvos() {
        RUNNER_SCHEME_TV
    } else {
        RUNNER_SCHEME_IOS
    }
}

pub fn lib_scheme(platform: PlatformName) -> &'static str {
    if platform.is_tvos() {
        LIB_SCHEME_TV
    } else {
        LIB_SCHEME_IOS
    }
}

/// Everything the builder needs from the session, resolved once.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub xcodebuild: String,
    pub udid: String,
    pub real_device: bool,
    pub platform_name: PlatformName,
    pub platform_version: String,
    pub ios_sdk_version: Option<String>,
    pub agent_path: PathBuf,
    pub bootstrap_path: PathBuf,
    pub derived_data_path: Option<PathBuf>,
    pub use_simple_build_test: bool,
    pub use_prebuilt_wda: bool,
    pub use_xctestrun_file: bool,
    pub allow_provisioning_device_registration: bool,
    pub result_bundle_path: Option<PathBuf>,
    pub result_bundle_version: Option<String>,
    pub xcode_config_file: Option<PathBuf>,
    pub xcode_org_id: Option<String>,
    pub xcode_signing_id: String,
    pub keychain_path: Option<PathBuf>,
    pub keychain_password: Option<String>,
    pub treat_warnings_as_errors: bool,
    pub show_xcode_log: Option<bool>,
    pub launch_timeout_ms: u64,
    pub remote_port: u16,
    pub updated_bundle_id: Option<String>,
    pub mjpeg_server_port: Option<u16>,
    pub prebuild_delay_ms: u64,
}

impl BuildSettings {
    pub fn from_config(config: &LauncherConfig, bootstrap_path: &Path, agent_path: &Path) -> Self {
        let s = &config.session;
        Self {
            xcodebuild: config.tools.xcodebuild.clone(),
            udid: s.udid.clone(),
            real_device: s.real_device,
            platform_name: s.platform_name,
            platform_version: s.platform_version.clone(),
            ios_sdk_version: s.ios_sdk_version.clone(),
            agent_path: agent_path.to_path_buf(),
            bootstrap_path: bootstrap_path.to_path_buf(),
            derived_data_path: s.derived_data_path.clone(),
            use_simple_build_test: s.use_simple_build_test,
            use_prebuilt_wda: s.use_prebuilt_wda,
            use_xctestrun_file: s.use_xctestrun_file,
            allow_provisioning_device_registration: s.allow_provisioning_device_registration,
            result_bundle_path: s.result_bundle_path.clone(),
            result_bundle_version: s.result_bundle_version.clone(),
            xcode_config_file: s.xcode_config_file.clone(),
            xcode_org_id: s.xcode_org_id.clone(),
            xcode_signing_id: s.xcode_signing_id.clone(),
            keychain_path: s.keychain_path.clone(),
            keychain_password: s.keychain_password.clone(),
            treat_warnings_as_errors: config.treat_warnings_as_errors,
            show_xcode_log: s.show_xcode_log,
            launch_timeout_ms: s.wda_launch_timeout_ms,
            remote_port: s.remote_port(),
            updated_bundle_id: s.updated_wda_bundle_id.clone().filter(|id| !id.is_empty()),
            mjpeg_server_port: s.mjpeg_server_port,
            prebuild_delay_ms: s.prebuild_delay_ms,
        }
    }
}

/// Program, arguments, and environment of one build-tool run. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// `major.minor` prefix of a platform version.
pub fn deployment_target(platform_version: &str) -> Option<String> {
    let re = Regex::new(r"^(\d+)\.(\d+)").ok()?;
    let caps = re.captures(platform_version)?;
    Some(format!("{}.{}", &caps[1], &caps[2]))
}

/// Arguments for `xcodebuild`.
///
/// `prebuilt` marks a runner that is already built (by a prebuild step or by
/// the caller), so only the test phase runs. A run descriptor path replaces
/// `-project`/`-scheme` entirely.
pub fn build_args(
    settings: &BuildSettings,
    build_only: bool,
    prebuilt: bool,
    xctestrun: Option<&Path>,
) -> Vec<String> {
    let (build_cmd, test_cmd) = if settings.use_simple_build_test {
        ("build", "test")
    } else {
        ("build-for-testing", "test-without-building")
    };

    let mut args: Vec<String> = if build_only {
        vec![build_cmd.into()]
    } else if prebuilt || settings.use_xctestrun_file {
        vec![test_cmd.into()]
    } else {
        vec![build_cmd.into(), test_cmd.into()]
    };

    if settings.allow_provisioning_device_registration {
        // the registration flag needs provisioning updates to take effect
        args.push("-allowProvisioningUpdates".into());
        args.push("-allowProvisioningDeviceRegistration".into());
    }
    if let Some(path) = &settings.result_bundle_path {
        args.push("-resultBundlePath".into());
        args.push(path.to_string_lossy().into_owned());
    }
    if let Some(version) = &settings.result_bundle_version {
        args.push("-resultBundleVersion".into());
        args.push(version.clone());
    }

    match xctestrun.filter(|_| settings.use_xctestrun_file) {
        Some(path) => {
            args.push("-xctestrun".into());
            args.push(path.to_string_lossy().into_owned());
        }
        None => {
            args.push("-project".into());
            args.push(settings.agent_path.to_string_lossy().into_owned());
            args.push("-scheme".into());
            args.push(runner_scheme(settings.platform_name).into());
            if let Some(dd) = &settings.derived_data_path {
                args.push("-derivedDataPath".into());
                args.push(dd.to_string_lossy().into_owned());
            }
        }
    }
    args.push("-destination".into());
    args.push(format!("id={}", settings.udid));

    match deployment_target(&settings.platform_version) {
        Some(target) => {
            let prefix = if settings.platform_name.is_tvos() { "TV" } else { "IPHONE" };
            args.push(format!("{prefix}OS_DEPLOYMENT_TARGET={target}"));
        }
        None => warn!(
            "Cannot parse major and minor version numbers from platform version '{}'. \
             Will build for the default platform instead",
            settings.platform_version
        ),
    }

    if settings.real_device {
        if let Some(xcconfig) = &settings.xcode_config_file {
            debug!("Using Xcode configuration file: '{}'", xcconfig.display());
            args.push("-xcconfig".into());
            args.push(xcconfig.to_string_lossy().into_owned());
        }
        if let Some(org_id) = &settings.xcode_org_id {
            if !settings.xcode_signing_id.is_empty() {
                args.push(format!("DEVELOPMENT_TEAM={org_id}"));
                args.push(format!("CODE_SIGN_IDENTITY={}", settings.xcode_signing_id));
            }
        }
    }

    if !settings.treat_warnings_as_errors {
        args.push("GCC_TREAT_WARNINGS_AS_ERRORS=0".into());
    }
    // skips the index store, which only IDE tooling reads
    args.push("COMPILER_INDEX_STORE_ENABLE=NO".into());
    args
}

/// Environment the runner reads at startup.
pub fn build_env(settings: &BuildSettings, upgrade_timestamp: Option<&str>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("USE_PORT".to_string(), settings.remote_port.to_string());
    env.insert(
        "WDA_PRODUCT_BUNDLE_IDENTIFIER".to_string(),
        settings
            .updated_bundle_id
            .clone()
            .unwrap_or_else(|| RUNNER_BUNDLE_ID.to_string()),
    );
    if let Some(port) = settings.mjpeg_server_port {
        env.insert("MJPEG_SERVER_PORT".to_string(), port.to_string());
    }
    if let Some(ts) = upgrade_timestamp {
        env.insert("UPGRADE_TIMESTAMP".to_string(), ts.to_string());
    }
    env
}

pub fn build_descriptor(
    settings: &BuildSettings,
    build_only: bool,
    prebuilt: bool,
    xctestrun: Option<&Path>,
    upgrade_timestamp: Option<&str>,
) -> BuildDescriptor {
    BuildDescriptor {
        program: settings.xcodebuild.clone(),
        args: build_args(settings, build_only, prebuilt, xctestrun),
        env: build_env(settings, upgrade_timestamp),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::SessionArgs;

    pub(crate) fn settings() -> BuildSettings {
        let config = LauncherConfig {
            session: SessionArgs {
                udid: "UDID-1".into(),
                platform_version: "17.2.1".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        BuildSettings::from_config(
            &config,
            Path::new("/opt/wda"),
            Path::new("/opt/wda/WebDriverAgent.xcodeproj"),
        )
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn default_build_and_test() {
        let args = build_args(&settings(), false, false, None);
        assert_eq!(args[0], "build-for-testing");
        assert_eq!(args[1], "test-without-building");
        assert!(has_pair(&args, "-project", "/opt/wda/WebDriverAgent.xcodeproj"));
        assert!(has_pair(&args, "-scheme", "WebDriverAgentRunner"));
        assert!(has_pair(&args, "-destination", "id=UDID-1"));
        assert!(args.contains(&"IPHONEOS_DEPLOYMENT_TARGET=17.2".to_string()));
        assert!(args.contains(&"GCC_TREAT_WARNINGS_AS_ERRORS=0".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("COMPILER_INDEX_STORE_ENABLE=NO"));
    }

    #[test]
    fn subcommand_selection() {
        let mut s = settings();
        assert_eq!(build_args(&s, true, false, None)[0], "build-for-testing");
        assert_eq!(build_args(&s, false, true, None)[0], "test-without-building");

        s.use_simple_build_test = true;
        let args = build_args(&s, false, false, None);
        assert_eq!(&args[..2], ["build", "test"]);
        assert_eq!(build_args(&s, true, false, None)[..2], ["build", "-project"]);
    }

    #[test]
    fn run_descriptor_replaces_project_and_scheme() {
        let mut s = settings();
        s.use_xctestrun_file = true;
        s.derived_data_path = Some("/tmp/dd".into());
        let args = build_args(&s, false, false, Some(Path::new("/opt/wda/UDID-1_17.2.xctestrun")));
        assert_eq!(args[0], "test-without-building");
        assert!(has_pair(&args, "-xctestrun", "/opt/wda/UDID-1_17.2.xctestrun"));
        assert!(!args.contains(&"-scheme".to_string()));
        assert!(!args.contains(&"-derivedDataPath".to_string()));
    }

    #[test]
    fn real_device_signing_and_tvos_target() {
        let mut s = settings();
        s.real_device = true;
        s.platform_name = PlatformName::Tvos;
        s.xcode_org_id = Some("TEAM123".into());
        s.xcode_config_file = Some("/tmp/signing.xcconfig".into());
        s.allow_provisioning_device_registration = true;
        s.treat_warnings_as_errors = true;

        let args = build_args(&s, false, false, None);
        assert!(has_pair(&args, "-scheme", "WebDriverAgentRunner_tvOS"));
        assert!(has_pair(&args, "-xcconfig", "/tmp/signing.xcconfig"));
        assert!(args.contains(&"DEVELOPMENT_TEAM=TEAM123".to_string()));
        assert!(args.contains(&"CODE_SIGN_IDENTITY=iPhone Developer".to_string()));
        assert!(args.contains(&"TVOS_DEPLOYMENT_TARGET=17.2".to_string()));
        assert!(has_pair(&args, "-allowProvisioningUpdates", "-allowProvisioningDeviceRegistration"));
        assert!(!args.contains(&"GCC_TREAT_WARNINGS_AS_ERRORS=0".to_string()));
    }

    #[test]
    fn unparsable_version_omits_target() {
        let mut s = settings();
        s.platform_version = "latest".into();
        let args = build_args(&s, false, false, None);
        assert!(!args.iter().any(|a| a.contains("DEPLOYMENT_TARGET")));
    }

    #[test]
    fn environment_contract() {
        let mut s = settings();
        let env = build_env(&s, None);
        assert_eq!(env["USE_PORT"], "8100");
        assert_eq!(env["WDA_PRODUCT_BUNDLE_IDENTIFIER"], RUNNER_BUNDLE_ID);
        assert!(!env.contains_key("MJPEG_SERVER_PORT"));
        assert!(!env.contains_key("UPGRADE_TIMESTAMP"));

        s.updated_bundle_id = Some("io.example.wda".into());
        s.mjpeg_server_port = Some(9100);
        let env = build_env(&s, Some("1700000000000"));
        assert_eq!(env["WDA_PRODUCT_BUNDLE_IDENTIFIER"], "io.example.wda");
        assert_eq!(env["MJPEG_SERVER_PORT"], "9100");
        assert_eq!(env["UPGRADE_TIMESTAMP"], "1700000000000");
    }
}
