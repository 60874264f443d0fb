//! Device-control seams.
//!
//! [`DeviceControl`] covers app management on one device or simulator and
//! the launch channels for a preinstalled runner. [`AlternateChannel`] is the
//! optional second tool (idb) that can install and run the XCTest bundle
//! without `xcodebuild`. Test doubles implement the same traits.

mod idb;
mod xcrun;
mod xctest;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;

use crate::error::LaunchError;

pub use idb::IdbChannel;
pub use xcrun::{parse_simctl_apps, DevicectlDevice, SimctlDevice};
pub use xctest::{XctestChild, XctestDriver};

/// A preinstalled runner to start, with the environment it should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreinstalledLaunch {
    pub bundle_id: String,
    pub env: BTreeMap<String, String>,
}

/// Which launch calls a device offers for a preinstalled runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchChannels {
    /// Per-OS-version launch call (`devicectl` on iOS 17 and later).
    pub modern: bool,
    /// Attach to the runner through an XCTest session (before iOS 17).
    pub xctest_session: bool,
}

/// A running XCTest session attached to the runner.
#[async_trait]
pub trait XctestSession: Send + Sync + Debug {
    async fn stop(&mut self);
}

#[async_trait]
pub trait DeviceControl: Send + Sync + Debug {
    fn udid(&self) -> &str;

    fn is_real_device(&self) -> bool;

    /// Bundle ids of user-installed apps whose bundle name is `bundle_name`.
    async fn user_installed_bundle_ids_by_name(
        &self,
        bundle_name: &str,
    ) -> Result<Vec<String>, LaunchError>;

    async fn remove_app(&self, bundle_id: &str) -> Result<(), LaunchError>;

    async fn is_app_installed(&self, bundle_id: &str) -> Result<bool, LaunchError>;

    async fn install_app(&self, app_path: &Path) -> Result<(), LaunchError>;

    async fn terminate_app(&self, bundle_id: &str) -> Result<(), LaunchError>;

    fn launch_channels(&self) -> LaunchChannels {
        LaunchChannels::default()
    }

    /// Start the runner through the per-OS-version launch call.
    async fn launch_modern(&self, launch: &PreinstalledLaunch) -> Result<(), LaunchError> {
        let _ = launch;
        Err(LaunchError::Unsupported(format!(
            "device {} has no modern launch channel",
            self.udid()
        )))
    }

    /// Start the runner inside an XCTest session the caller must stop.
    async fn start_xctest_session(
        &self,
        launch: &PreinstalledLaunch,
    ) -> Result<Box<dyn XctestSession>, LaunchError> {
        let _ = launch;
        Err(LaunchError::Unsupported(format!(
            "device {} has no XCTest session channel",
            self.udid()
        )))
    }

    /// Simulator launch call.
    async fn launch_app(&self, launch: &PreinstalledLaunch) -> Result<(), LaunchError> {
        let _ = launch;
        Err(LaunchError::Unsupported(format!(
            "device {} cannot launch apps directly",
            self.udid()
        )))
    }
}

/// Alternate device-control tool able to run the XCTest bundle itself.
#[async_trait]
pub trait AlternateChannel: Send + Sync + Debug {
    /// Install the `.xctest` bundle and return its bundle id.
    async fn install_xctest_bundle(&self, xctest_path: &Path) -> Result<String, LaunchError>;

    /// Start the UI test runner. Returns once the run has been started.
    async fn run_xcuitest(
        &self,
        app_bundle_id: &str,
        test_host_bundle_id: &str,
        test_bundle_id: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<(), LaunchError>;

    /// Stop a run started by [`AlternateChannel::run_xcuitest`].
    async fn stop(&self);
}
