//! Bump-version command implementation

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Args;
use tracing::info;

const LIB_MANIFEST: &str = "WebDriverAgentLib/Info.plist";
const VERSION_KEYS: [&str; 2] = ["CFBundleShortVersionString", "CFBundleVersion"];

/// Set the agent library version
#[derive(Args, Debug)]
pub struct BumpVersionArgs {
    /// New version, in the form 1.2.3
    version: String,

    /// Root of the agent sources (default: current directory)
    #[arg(long, value_name = "PATH")]
    project_root: Option<PathBuf>,
}

pub fn execute(args: BumpVersionArgs) -> Result<()> {
    let version = semver::Version::parse(&args.version).map_err(|_| {
        anyhow!(
            "Invalid version specified '{}'. Version should be in the form '1.2.3'",
            args.version
        )
    })?;

    let root = match args.project_root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let manifest = root.join(LIB_MANIFEST);
    info!(
        "Updating the WebDriverAgent manifest at '{}' to version '{version}'",
        manifest.display()
    );
    update_manifest(&manifest, &version.to_string())?;
    println!("Set {} to {version}", manifest.display());
    Ok(())
}

fn update_manifest(path: &Path, version: &str) -> Result<()> {
    let mut value = plist::Value::from_file(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let dict = value
        .as_dictionary_mut()
        .ok_or_else(|| anyhow!("{} is not a dictionary plist", path.display()))?;
    for key in VERSION_KEYS {
        dict.insert(key.to_string(), plist::Value::String(version.to_string()));
    }
    value
        .to_file_xml(path)
        .with_context(|| format!("cannot write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn update_manifest_rewrites_both_keys_and_keeps_others() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Info.plist");
        let mut dict = plist::Dictionary::new();
        dict.insert("CFBundleVersion".into(), plist::Value::String("1.0.0".into()));
        dict.insert("CFBundleName".into(), plist::Value::String("WebDriverAgentLib".into()));
        plist::Value::Dictionary(dict).to_file_xml(&path).unwrap();

        update_manifest(&path, "9.1.2").unwrap();

        let value = plist::Value::from_file(&path).unwrap();
        let dict = value.as_dictionary().unwrap();
        for key in VERSION_KEYS {
            assert_eq!(dict.get(key).and_then(plist::Value::as_string), Some("9.1.2"));
        }
        assert_eq!(
            dict.get("CFBundleName").and_then(plist::Value::as_string),
            Some("WebDriverAgentLib")
        );
    }

    #[test]
    fn update_manifest_rejects_non_dictionary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Info.plist");
        plist::Value::Array(vec![]).to_file_xml(&path).unwrap();

        let err = update_manifest(&path, "1.0.0").unwrap_err();
        assert!(err.to_string().contains("not a dictionary"));
    }
}
