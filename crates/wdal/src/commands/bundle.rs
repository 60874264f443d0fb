//! Bundle command implementation
//!
//! Builds the simulator runner with the project's build script and zips the
//! resulting application for release.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::{info, warn};

use webdriver_agent_launcher_core::RUNNER_APP;
use webdriver_agent_launcher_core::exec::{CommandRunner, ExecError, ExecOptions, SystemCommandRunner};

const DERIVED_DATA_DIR: &str = "wdaBuild";
const PRODUCTS_DIR: &str = "Build/Products/Debug-iphonesimulator";

/// Build and archive the simulator runner
#[derive(Args, Debug)]
pub struct BundleArgs {
    /// Xcode version recorded in the archive name
    #[arg(long)]
    xcode_version: String,

    /// Build script target
    #[arg(long, default_value = "runner")]
    target: String,

    /// Build script SDK
    #[arg(long, default_value = "sim")]
    sdk: String,

    /// Root of the agent sources (default: --bootstrap-path or current directory)
    #[arg(long, value_name = "PATH")]
    project_root: Option<PathBuf>,
}

pub async fn execute(target: &super::target::TargetArgs, args: BundleArgs) -> Result<()> {
    let root = match args.project_root.or_else(|| target.bootstrap_path.clone()) {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let (config, _) = target.resolve()?;
    let runner = SystemCommandRunner;
    let derived_data = root.join(DERIVED_DATA_DIR);

    info!("Cleaning build directory {}", derived_data.display());
    let clean = [
        "clean".to_string(),
        "-derivedDataPath".to_string(),
        derived_data.display().to_string(),
        "-scheme".to_string(),
        "WebDriverAgentRunner".to_string(),
    ];
    if let Err(e) = runner
        .run(&config.tools.xcodebuild, &clean, &ExecOptions::in_dir(&root))
        .await
    {
        warn!("clean failed, building anyway: {e}");
    }

    info!("Building WebDriverAgent for {} ({})", args.target, args.sdk);
    let opts = ExecOptions {
        cwd: Some(root.clone()),
        env: BTreeMap::from([
            ("TARGET".to_string(), args.target.clone()),
            ("SDK".to_string(), args.sdk.clone()),
            ("DERIVED_DATA_PATH".to_string(), derived_data.display().to_string()),
        ]),
    };
    let script = ["./Scripts/build.sh".to_string()];
    if let Err(e) = runner.run("/bin/bash", &script, &opts).await {
        if let ExecError::NonZero { stderr, .. } = &e {
            bail!("build failed: {}", stderr.trim());
        }
        return Err(e).context("cannot run ./Scripts/build.sh");
    }

    let products = derived_data.join(PRODUCTS_DIR);
    let zip_name = archive_name(&args.xcode_version);
    let in_products = ExecOptions::in_dir(&products);
    runner
        .run("xattr", &["-cr".to_string(), RUNNER_APP.to_string()], &in_products)
        .await
        .context("cannot clear extended attributes")?;
    runner
        .run(
            "zip",
            &["-qr".to_string(), zip_name.clone(), RUNNER_APP.to_string()],
            &in_products,
        )
        .await
        .context("cannot archive the runner")?;

    println!("Wrote {}", products.join(&zip_name).display());
    Ok(())
}

fn archive_name(xcode_version: &str) -> String {
    format!("WebDriverAgentRunner-Runner-Sim-{xcode_version}.zip")
}
