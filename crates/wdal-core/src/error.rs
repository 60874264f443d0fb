//! Error taxonomy for agent launches.
//!
//! Configuration, build, and readiness errors propagate to the caller and end
//! the launch attempt. Housekeeping failures (uninstall, marker persistence,
//! identity restore, stale-process cleanup) never reach this type: they are
//! logged where they happen and swallowed.

use std::path::PathBuf;

use thiserror::Error;

use crate::exec::ExecError;
use crate::proxy::ProxyError;

/// Errors that terminate a launch attempt.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The agent project does not exist at the resolved path.
    #[error(
        "Trying to use WebDriverAgent project at '{}' but the file does not exist",
        .path.display()
    )]
    MissingProject { path: PathBuf },

    /// No `.xctestrun` file matched the device.
    #[error(
        "If you are using 'use_xctestrun_file' then you need to have a xctestrun file (expected: '{}')",
        .expected.display()
    )]
    MissingRunDescriptor { expected: PathBuf },

    /// A run descriptor exists but could not be read or patched.
    #[error("Cannot update run descriptor '{}': {message}", .path.display())]
    RunDescriptor { path: PathBuf, message: String },

    /// The build tool reported failure, either by exit code or by an
    /// `Error Domain=` marker in its output.
    #[error("xcodebuild failed with {}\nxcodebuild error message:\n{output}\n{hint}",
        exit_description(.code, .signal))]
    BuildFailed {
        code: Option<i32>,
        signal: Option<i32>,
        output: String,
        hint: String,
    },

    /// The agent process stayed alive but never answered `/status`.
    #[error(
        "We were not able to retrieve the /status response from the WebDriverAgent server after {timeout_ms}ms timeout. \
         Try to increase the value of 'wda_launch_timeout_ms' as a possible workaround."
    )]
    ReadinessTimeout { timeout_ms: u64 },

    /// A preinstalled agent was started but never answered `/status`.
    #[error(
        "WebDriverAgent was not reachable within {timeout_ms}ms after launching the preinstalled runner. \
         Make sure the runner is installed and try to increase 'wda_startup_retry_timeout_ms'."
    )]
    PreinstalledNotReady { timeout_ms: u64 },

    /// The requested launch mode is not available for this device.
    #[error("{0}")]
    Unsupported(String),

    /// A device-control channel call failed.
    #[error("device control failed: {0}")]
    DeviceControl(String),

    /// The runner bundle could not be located or inspected.
    #[error("{0}")]
    Bundle(String),

    /// The build subprocess could not be started.
    #[error("Unable to start WebDriverAgent: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn exit_description(code: &Option<i32>, signal: &Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "no exit code".to_string(),
    }
}

impl LaunchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_timeout_names_the_knob_and_value() {
        let msg = LaunchError::ReadinessTimeout { timeout_ms: 5000 }.to_string();
        assert!(msg.contains("5000ms"));
        assert!(msg.contains("wda_launch_timeout_ms"));
    }

    #[test]
    fn missing_run_descriptor_names_expected_path() {
        let err = LaunchError::MissingRunDescriptor {
            expected: PathBuf::from("/wda/WebDriverAgentRunner_iphoneos17.0-arm64.xctestrun"),
        };
        assert!(err.to_string().contains("iphoneos17.0-arm64.xctestrun"));
    }

    #[test]
    fn build_failed_includes_output_and_hint() {
        let err = LaunchError::BuildFailed {
            code: Some(0),
            signal: None,
            output: "Error Domain=NSPOSIXErrorDomain".into(),
            hint: "enable show_xcode_log".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("xcodebuild failed with code 0\n"));
        assert!(!msg.contains("Some("));
        assert!(msg.contains("Error Domain=NSPOSIXErrorDomain"));
        assert!(msg.contains("enable show_xcode_log"));
    }

    #[test]
    fn build_failed_by_signal_names_the_signal() {
        let err = LaunchError::BuildFailed {
            code: None,
            signal: Some(9),
            output: String::new(),
            hint: String::new(),
        };
        assert!(err.to_string().starts_with("xcodebuild failed with signal 9\n"));
    }
}
