//! Fetch-prebuilt command implementation
//!
//! Downloads every asset attached to the agent's GitHub release into
//! `prebuilt-agents/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Args;
use serde::Deserialize;
use tracing::info;

use webdriver_agent_launcher_core::upgrade::ModuleManifest;

use super::target::TargetArgs;

const PREBUILT_DIR: &str = "prebuilt-agents";
const USER_AGENT: &str = concat!("wdal/", env!("CARGO_PKG_VERSION"));

/// Download prebuilt agents
#[derive(Args, Debug)]
pub struct FetchPrebuiltArgs {
    /// Release version without the leading 'v' (default: package.json version)
    #[arg(long)]
    version: Option<String>,

    /// GitHub repository holding the releases
    #[arg(long, default_value = "appium/webdriveragent")]
    repo: String,

    /// GitHub API root
    #[arg(long, default_value = "https://api.github.com")]
    api_url: String,

    /// Directory to download into (default: prebuilt-agents under the current directory)
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    browser_download_url: String,
}

pub async fn execute(target: &TargetArgs, args: FetchPrebuiltArgs) -> Result<()> {
    let current_dir = std::env::current_dir()?;
    let version = match args.version {
        Some(version) => version,
        None => {
            let root = target.bootstrap_path.as_deref().unwrap_or(&current_dir);
            ModuleManifest::read(root)?.version
        }
    };
    let output = args.output.unwrap_or_else(|| current_dir.join(PREBUILT_DIR));

    let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
    let release_url = format!(
        "{}/repos/{}/releases/tags/v{version}",
        args.api_url.trim_end_matches('/'),
        args.repo
    );
    info!("Getting WDA release {release_url}");
    let release: Release = client
        .get(&release_url)
        .send()
        .await?
        .error_for_status()
        .with_context(|| format!("cannot fetch release v{version}"))?
        .json()
        .await?;

    if output.exists() {
        std::fs::remove_dir_all(&output)
            .with_context(|| format!("cannot remove {}", output.display()))?;
    }
    std::fs::create_dir_all(&output)
        .with_context(|| format!("cannot create {}", output.display()))?;

    for asset in &release.assets {
        let name = asset_file_name(&asset.browser_download_url)?;
        download(&client, &asset.browser_download_url, &output.join(name)).await?;
    }
    println!(
        "Downloaded {} prebuilt agent(s) to {}",
        release.assets.len(),
        output.display()
    );
    Ok(())
}

async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    info!("Downloading {url}");
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()
        .with_context(|| format!("failed to download {url}"))?
        .bytes()
        .await?;
    tokio::fs::write(dest, &body)
        .await
        .with_context(|| format!("cannot write {}", dest.display()))?;
    info!("Wrote {} ({} bytes)", dest.display(), body.len());
    Ok(())
}

fn asset_file_name(url: &str) -> Result<&str> {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("asset URL '{url}' has no file name"))
}
