//! Agent identity and the borrowed project identity file.
//!
//! A custom bundle id on a real device is applied by rewriting
//! `project.pbxproj` in place after copying it to `project.pbxproj.old`.
//! The backup doubles as the "mutated" marker: [`restore_identity`] moves it
//! back and is a no-op when it is absent. Failures on either side are logged
//! and swallowed; a build with a stale identity can still proceed.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::SessionArgs;
use crate::{PROJECT_FILE, RUNNER_BUNDLE_ID};

/// Suffix XCTest appends to the runner's bundle id.
pub const XCTEST_SUFFIX: &str = ".xctrunner";

/// Bundle ids a session runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Id the runner app is built with.
    pub runner_bundle_id: String,
    /// Id XCTest reports for the installed runner.
    pub xctest_bundle_id: String,
    pub updated_bundle_id: Option<String>,
}

impl AgentIdentity {
    pub fn from_session(args: &SessionArgs) -> Self {
        let updated = args
            .updated_wda_bundle_id
            .clone()
            .filter(|id| !id.is_empty());
        let runner_bundle_id = updated.clone().unwrap_or_else(|| RUNNER_BUNDLE_ID.to_string());
        let suffix = args
            .updated_wda_bundle_id_suffix
            .as_deref()
            .unwrap_or(XCTEST_SUFFIX);
        Self {
            xctest_bundle_id: format!("{runner_bundle_id}{suffix}"),
            runner_bundle_id,
            updated_bundle_id: updated,
        }
    }
}

fn project_file(agent_path: &Path) -> PathBuf {
    agent_path.join(PROJECT_FILE)
}

fn backup_file(agent_path: &Path) -> PathBuf {
    agent_path.join(format!("{PROJECT_FILE}.old"))
}

/// Bring the project identity file into the state this session needs.
///
/// Run descriptors carry their own identity, so nothing is touched then.
/// Simulators accept any bundle id and are left alone as well. Returns
/// whether the project file now carries a custom id.
pub async fn prepare_identity(
    agent_path: &Path,
    use_run_descriptor: bool,
    is_real_device: bool,
    updated_bundle_id: Option<&str>,
) -> bool {
    if use_run_descriptor || !is_real_device {
        return false;
    }
    // a previous session may have left its custom id behind
    restore_identity(agent_path).await;
    match updated_bundle_id {
        Some(id) if !id.is_empty() => update_project_file(agent_path, id).await,
        _ => false,
    }
}

/// Back up the project file and replace the default runner id with `new_bundle_id`.
pub async fn update_project_file(agent_path: &Path, new_bundle_id: &str) -> bool {
    let project = project_file(agent_path);
    let result = async {
        tokio::fs::copy(&project, backup_file(agent_path)).await?;
        let contents = tokio::fs::read_to_string(&project).await?;
        tokio::fs::write(&project, contents.replace(RUNNER_BUNDLE_ID, new_bundle_id)).await
    }
    .await;

    match result {
        Ok(()) => {
            debug!(path = %project.display(), bundle_id = new_bundle_id, "updated project bundle id");
            true
        }
        Err(e) => {
            debug!(error = %e, "error updating project file");
            warn!(
                "Unable to update project file '{}' with bundle id '{new_bundle_id}'. WebDriverAgent may not start",
                project.display()
            );
            false
        }
    }
}

/// Put the original project file back. Returns true when a backup was restored.
pub async fn restore_identity(agent_path: &Path) -> bool {
    let project = project_file(agent_path);
    let backup = backup_file(agent_path);
    if !tokio::fs::try_exists(&backup).await.unwrap_or(false) {
        return false;
    }
    match tokio::fs::rename(&backup, &project).await {
        Ok(()) => {
            debug!(path = %project.display(), bundle_id = RUNNER_BUNDLE_ID, "reset project bundle id");
            true
        }
        Err(e) => {
            debug!(error = %e, "error resetting project file");
            warn!(
                "Unable to reset project file '{}' with bundle id '{RUNNER_BUNDLE_ID}'. \
                 WebDriverAgent has been modified and not returned to the original state.",
                project.display()
            );
            false
        }
    }
}
