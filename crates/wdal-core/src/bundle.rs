//! Locating and inspecting a built runner `.app`.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::LaunchError;
use crate::exec::{argv, CommandRunner, ExecOptions};
use crate::RUNNER_APP;

/// Scheme built for the simulator bundle.
const SIM_SCHEME: &str = "WebDriverAgentRunner";

/// Read `CFBundleIdentifier` from the bundle's `Info.plist`.
pub fn parse_bundle_id(bundle_path: &Path) -> Result<String, LaunchError> {
    let info_plist = bundle_path.join("Info.plist");
    let value = plist::Value::from_file(&info_plist).map_err(|e| {
        LaunchError::Bundle(format!("Cannot read '{}': {e}", info_plist.display()))
    })?;
    value
        .as_dictionary()
        .and_then(|d| d.get("CFBundleIdentifier"))
        .and_then(plist::Value::as_string)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            LaunchError::Bundle(format!("Could not find bundle id in '{}'", info_plist.display()))
        })
}

/// First runner `.app` anywhere under `derived_data`.
pub fn find_in_derived_data(derived_data: &Path) -> Result<PathBuf, LaunchError> {
    let pattern = format!("{}/**/*{RUNNER_APP}", derived_data.display());
    let mut matches = glob::glob(&pattern)
        .map_err(|e| LaunchError::Bundle(format!("invalid search pattern '{pattern}': {e}")))?
        .filter_map(Result::ok)
        .filter(|p| p.is_dir());
    matches.next().ok_or_else(|| {
        LaunchError::Bundle(format!(
            "Could not find the WDA bundle in '{}'",
            derived_data.display()
        ))
    })
}

/// Where a simulator build of the runner lands inside `derived_data`.
pub fn simulator_bundle_path(derived_data: &Path) -> PathBuf {
    derived_data
        .join("Build")
        .join("Products")
        .join("Debug-iphonesimulator")
        .join(RUNNER_APP)
}

/// Simulator runner bundle, building it first when it is missing.
pub async fn simulator_bundle(
    runner: &dyn CommandRunner,
    xcodebuild: &str,
    bootstrap_path: &Path,
    derived_data: Option<&Path>,
) -> Result<PathBuf, LaunchError> {
    let derived_data = derived_data.ok_or_else(|| {
        LaunchError::Bundle("Cannot retrieve the path to the Xcode derived data folder".into())
    })?;
    let bundle = simulator_bundle_path(derived_data);
    if bundle.exists() {
        debug!(path = %bundle.display(), "simulator bundle already built");
        return Ok(bundle);
    }

    info!("Building the simulator runner bundle");
    let project = bootstrap_path.join("WebDriverAgent.xcodeproj");
    let args = argv([
        "-project".to_string(),
        project.to_string_lossy().into_owned(),
        "-scheme".into(),
        SIM_SCHEME.into(),
        "-sdk".into(),
        "iphonesimulator".into(),
        "CODE_SIGN_IDENTITY=\"\"".into(),
        "CODE_SIGNING_REQUIRED=\"NO\"".into(),
        "GCC_TREAT_WARNINGS_AS_ERRORS=0".into(),
    ]);
    runner
        .run(xcodebuild, &args, &ExecOptions::in_dir(bootstrap_path))
        .await?;
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;
    use tempfile::TempDir;

    fn write_info(dir: &Path, id: Option<&str>) {
        std::fs::create_dir_all(dir).unwrap();
        let mut info = plist::Dictionary::new();
        if let Some(id) = id {
            info.insert("CFBundleIdentifier".into(), plist::Value::String(id.into()));
        }
        plist::Value::Dictionary(info)
            .to_file_xml(dir.join("Info.plist"))
            .unwrap();
    }

    #[test]
    fn parses_bundle_identifier() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join(RUNNER_APP);
        write_info(&app, Some("io.example.wda.xctrunner"));
        assert_eq!(parse_bundle_id(&app).unwrap(), "io.example.wda.xctrunner");
    }

    #[test]
    fn missing_identifier_is_an_error() {
        let dir = TempDir::new().unwrap();
        write_info(dir.path(), None);
        let err = parse_bundle_id(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Could not find bundle id"));
    }

    #[test]
    fn finds_bundle_in_derived_data() {
        let dir = TempDir::new().unwrap();
        assert!(find_in_derived_data(dir.path()).is_err());

        let app = dir.path().join("Build/Products/Debug-iphoneos").join(RUNNER_APP);
        std::fs::create_dir_all(&app).unwrap();
        assert_eq!(find_in_derived_data(dir.path()).unwrap(), app);
    }

    #[tokio::test]
    async fn simulator_bundle_builds_only_when_missing() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();

        let path = simulator_bundle(&runner, "xcodebuild", dir.path(), Some(dir.path()))
            .await
            .unwrap();
        assert_eq!(path, simulator_bundle_path(dir.path()));
        assert_eq!(runner.calls_to("xcodebuild").len(), 1);

        std::fs::create_dir_all(&path).unwrap();
        simulator_bundle(&runner, "xcodebuild", dir.path(), Some(dir.path()))
            .await
            .unwrap();
        assert_eq!(runner.calls_to("xcodebuild").len(), 1);

        assert!(simulator_bundle(&runner, "xcodebuild", dir.path(), None).await.is_err());
    }
}
