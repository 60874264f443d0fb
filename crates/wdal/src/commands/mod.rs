//! CLI command dispatch and execution

use anyhow::Result;
use clap::{Parser, Subcommand};

mod bump_version;
mod bundle;
mod clean;
mod fetch_prebuilt;
mod launch;
mod status;
mod target;
mod uninstall;

use target::TargetArgs;

/// wdal - launch and supervise WebDriverAgent
#[derive(Parser, Debug)]
#[command(
    name = "wdal",
    version,
    about = "Launch and supervise WebDriverAgent on iOS and tvOS targets",
    long_about = "Builds (or reuses) the WebDriverAgent runner, starts it on a device or \
                  simulator, waits for its /status endpoint, and tears it down again"
)]
pub struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    /// Log at debug level (overrides WDAL_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the agent, print its status, and wait for Ctrl-C
    Launch(launch::LaunchArgs),

    /// Query the agent's /status endpoint once
    Status(status::StatusArgs),

    /// Remove every installed runner package from the device
    Uninstall,

    /// Clean the agent project (library and runner schemes)
    Clean(clean::CleanArgs),

    /// Set the version in WebDriverAgentLib/Info.plist
    BumpVersion(bump_version::BumpVersionArgs),

    /// Download the prebuilt agents of a release
    FetchPrebuilt(fetch_prebuilt::FetchPrebuiltArgs),

    /// Build the simulator runner and archive it
    Bundle(bundle::BundleArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Launch(args) => launch::execute(&self.target, args).await,
            Commands::Status(args) => status::execute(&self.target, args).await,
            Commands::Uninstall => uninstall::execute(&self.target).await,
            Commands::Clean(args) => clean::execute(&self.target, args).await,
            Commands::BumpVersion(args) => bump_version::execute(args),
            Commands::FetchPrebuilt(args) => fetch_prebuilt::execute(&self.target, args).await,
            Commands::Bundle(args) => bundle::execute(&self.target, args).await,
        }
    }
}
