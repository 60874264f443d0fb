//! Per-device `.xctestrun` run descriptors.
//!
//! A run descriptor lets `xcodebuild test-without-building` start a
//! prebuilt runner. Each device gets its own copy so concurrent sessions
//! can listen on different ports; the port is injected into the runner's
//! `EnvironmentVariables` block.

use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};
use tracing::info;

use crate::config::PlatformName;
use crate::error::LaunchError;

/// The device facts that key a run descriptor.
#[derive(Debug, Clone)]
pub struct DescriptorDevice<'a> {
    pub udid: &'a str,
    pub is_real_device: bool,
    pub platform_version: &'a str,
    pub platform_name: PlatformName,
}

/// Xcode's name for a host architecture.
fn xcode_arch(arch: &str) -> &str {
    match arch {
        "aarch64" => "arm64",
        other => other,
    }
}

/// Architecture simulator builds target on this host.
pub fn simulator_arch() -> &'static str {
    xcode_arch(std::env::consts::ARCH)
}

/// Name of the template Xcode writes for `version`.
pub fn template_file_name(device: &DescriptorDevice<'_>, version: &str) -> String {
    let target = if device.is_real_device {
        format!("os{version}-arm64")
    } else {
        format!("simulator{version}-{}", simulator_arch())
    };
    if device.platform_name.is_tvos() {
        format!("WebDriverAgentRunner_tvOS_appletv{target}.xctestrun")
    } else {
        format!("WebDriverAgentRunner_iphone{target}.xctestrun")
    }
}

/// Runner key the environment block lives under.
pub fn runner_key(platform_name: PlatformName) -> &'static str {
    if platform_name.is_tvos() {
        "WebDriverAgentRunner_tvOS"
    } else {
        "WebDriverAgentRunner"
    }
}

/// Locate the device's descriptor, creating it from the template if needed.
///
/// Candidates are tried in order: SDK-keyed, then platform-version-keyed.
/// For each, an existing per-device file wins; otherwise a matching template
/// is copied into place.
pub fn find_run_descriptor(
    device: &DescriptorDevice<'_>,
    sdk_version: Option<&str>,
    bootstrap_path: &Path,
) -> Result<PathBuf, LaunchError> {
    let versions = sdk_version
        .into_iter()
        .chain(std::iter::once(device.platform_version))
        .filter(|v| !v.is_empty());

    for version in versions {
        let per_device = bootstrap_path.join(format!("{}_{version}.xctestrun", device.udid));
        if per_device.exists() {
            info!("Using '{}' as xctestrun file", per_device.display());
            return Ok(per_device);
        }

        let template = bootstrap_path.join(template_file_name(device, version));
        if template.exists() {
            std::fs::copy(&template, &per_device).map_err(|e| LaunchError::io(&per_device, e))?;
            info!(
                "Using '{}' as xctestrun file copied by '{}'",
                per_device.display(),
                template.display()
            );
            return Ok(per_device);
        }
    }

    let expected_version = sdk_version.unwrap_or(device.platform_version);
    Err(LaunchError::MissingRunDescriptor {
        expected: bootstrap_path.join(template_file_name(device, expected_version)),
    })
}

/// Set `USE_PORT` under the runner's `EnvironmentVariables`, keeping every
/// other key intact.
pub fn inject_port(path: &Path, platform_name: PlatformName, port: u16) -> Result<(), LaunchError> {
    let descriptor_error = |message: String| LaunchError::RunDescriptor {
        path: path.to_path_buf(),
        message,
    };

    let mut root = Value::from_file(path).map_err(|e| descriptor_error(e.to_string()))?;
    let root_dict = root
        .as_dictionary_mut()
        .ok_or_else(|| descriptor_error("top level is not a dictionary".into()))?;

    let runner = child_dictionary(root_dict, runner_key(platform_name))
        .ok_or_else(|| descriptor_error(format!("'{}' is not a dictionary", runner_key(platform_name))))?;
    let env = child_dictionary(runner, "EnvironmentVariables")
        .ok_or_else(|| descriptor_error("'EnvironmentVariables' is not a dictionary".into()))?;
    env.insert("USE_PORT".to_string(), Value::String(port.to_string()));

    root.to_file_xml(path).map_err(|e| descriptor_error(e.to_string()))
}

/// Get `key` as a dictionary, inserting an empty one when absent.
fn child_dictionary<'a>(parent: &'a mut Dictionary, key: &str) -> Option<&'a mut Dictionary> {
    if !parent.contains_key(key) {
        parent.insert(key.to_string(), Value::Dictionary(Dictionary::new()));
    }
    parent.get_mut(key)?.as_dictionary_mut()
}

/// Resolve the device's run descriptor and point it at `remote_port`.
pub fn resolve_run_descriptor_path(
    device: &DescriptorDevice<'_>,
    sdk_version: Option<&str>,
    bootstrap_path: &Path,
    remote_port: u16,
) -> Result<PathBuf, LaunchError> {
    let path = find_run_descriptor(device, sdk_version, bootstrap_path)?;
    inject_port(&path, device.platform_name, remote_port)?;
    Ok(path)
}
