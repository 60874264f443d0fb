//! One-time project cleanup after the agent sources are upgraded.
//!
//! The version of the installed sources is read from the bootstrap
//! `package.json`. The version last cleaned for is kept in the
//! [`StateStore`]. Every failure here is logged and treated as "skip the
//! cleanup"; nothing propagates.

use std::future::Future;
use std::path::Path;
use std::time::UNIX_EPOCH;

use regex::Regex;
use semver::Version;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::LaunchError;
use crate::store::StateStore;

/// Store item holding the module version the project was last cleaned for.
pub const RECENT_MODULE_VERSION_ITEM: &str = "recent_module_version";

/// Version assumed for installations that only carry the legacy marker.
pub const LEGACY_BASELINE_VERSION: &str = "5.0.0";

/// Legacy upgrade marker, relative to the home directory.
pub const LEGACY_TIMESTAMP_MARKER: &str = ".wdal/webdriveragent/upgrade.time";

const MANIFEST_FILE: &str = "package.json";

/// Name and version of the installed agent sources.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub version: String,
}

impl ModuleManifest {
    pub fn read(bootstrap_path: &Path) -> Result<Self, LaunchError> {
        let path = bootstrap_path.join(MANIFEST_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|e| LaunchError::io(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| LaunchError::Bundle(format!(
            "cannot parse module manifest '{}': {e}",
            path.display()
        )))
    }
}

/// Outcome of [`cleanup_if_upgraded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No marker of any kind: the current version was recorded.
    FreshInstall,
    /// The recorded version is not older than the installed one.
    UpToDate { recorded: String },
    /// The recorded version could not be parsed and was overwritten.
    DamagedMarker,
    /// The project was cleaned and the marker moved forward.
    Cleaned { from: String, to: String },
    /// Something failed; the cleanup was skipped.
    Skipped,
}

/// Lenient version parse: the first `major[.minor[.patch]]` run in `raw`.
pub fn coerce_version(raw: &str) -> Option<Version> {
    let re = Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?").ok()?;
    let caps = re.captures(raw)?;
    let part = |i: usize| -> Option<u64> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
    };
    Some(Version::new(part(1)?, part(2)?, part(3)?))
}

/// Clean the project once per upgrade of the agent sources.
///
/// `clean` is only invoked when the recorded version is older than
/// `current_version`. The marker moves forward only after a successful clean.
pub async fn cleanup_if_upgraded<F, Fut>(
    store: &StateStore,
    home_dir: &Path,
    current_version: &str,
    clean: F,
) -> CleanupOutcome
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), LaunchError>>,
{
    let recorded = match store.get(RECENT_MODULE_VERSION_ITEM).await {
        Ok(recorded) => recorded,
        Err(e) => {
            warn!("The recent module version cannot be read: {e}");
            return CleanupOutcome::Skipped;
        }
    };

    let recorded = match recorded {
        Some(recorded) => recorded,
        None if home_dir.join(LEGACY_TIMESTAMP_MARKER).exists() => {
            // installations from before the store existed
            if let Err(e) = store.set(RECENT_MODULE_VERSION_ITEM, LEGACY_BASELINE_VERSION).await {
                warn!("The actual module version cannot be persisted: {e}");
                return CleanupOutcome::Skipped;
            }
            LEGACY_BASELINE_VERSION.to_string()
        }
        None => {
            info!("There is no need to perform the project cleanup. A fresh install has been detected");
            if let Err(e) = store.set(RECENT_MODULE_VERSION_ITEM, current_version).await {
                warn!("The actual module version cannot be persisted: {e}");
            }
            return CleanupOutcome::FreshInstall;
        }
    };

    let Some(recorded_version) = coerce_version(&recorded) else {
        warn!("The persisted module version string has been damaged: '{recorded}'");
        info!("Updating it to '{current_version}' assuming the project cleanup is not needed");
        if let Err(e) = store.set(RECENT_MODULE_VERSION_ITEM, current_version).await {
            warn!("The actual module version cannot be persisted: {e}");
        }
        return CleanupOutcome::DamagedMarker;
    };
    let Some(current) = coerce_version(current_version) else {
        warn!("Cannot parse the installed module version '{current_version}'; skipping the project cleanup");
        return CleanupOutcome::Skipped;
    };

    if recorded_version >= current {
        info!(
            "WebDriverAgent does not need a cleanup. The project sources are up to date \
             ({recorded_version} >= {current})"
        );
        return CleanupOutcome::UpToDate { recorded };
    }

    info!(
        "Cleaning up the WebDriverAgent project after the module upgrade has happened \
         ({recorded_version} < {current})"
    );
    if let Err(e) = clean().await {
        warn!("Cannot perform WebDriverAgent project cleanup. Original error: {e}");
        return CleanupOutcome::Skipped;
    }
    if let Err(e) = store.set(RECENT_MODULE_VERSION_ITEM, current_version).await {
        warn!("The actual module version cannot be persisted: {e}");
    }
    CleanupOutcome::Cleaned {
        from: recorded,
        to: current_version.to_string(),
    }
}

/// Modification time of the bootstrap manifest in epoch milliseconds.
///
/// Baked into the agent at build time and compared against a running
/// agent's `build.upgradedAt` to detect stale installs.
pub fn upgrade_timestamp(bootstrap_path: &Path) -> Option<String> {
    let modified = std::fs::metadata(bootstrap_path.join(MANIFEST_FILE))
        .and_then(|m| m.modified())
        .ok()?;
    let millis = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
    Some(millis.to_string())
}
