//! Clean command implementation

use anyhow::Result;
use clap::Args;

use webdriver_agent_launcher_core::upgrade::CleanupOutcome;

use super::target::TargetArgs;

/// Clean the agent project
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Only clean when the installed sources are newer than the last recorded version
    #[arg(long)]
    if_upgraded: bool,
}

pub async fn execute(target: &TargetArgs, args: CleanArgs) -> Result<()> {
    let supervisor = target.supervisor(false)?;

    if !args.if_upgraded {
        supervisor.clean_project().await?;
        println!("Cleaned {}", supervisor.agent_path().display());
        return Ok(());
    }

    match supervisor.cleanup_project_if_fresh().await {
        CleanupOutcome::Cleaned { from, to } => println!("Cleaned after upgrade {from} -> {to}"),
        CleanupOutcome::FreshInstall => println!("Recorded fresh install; nothing to clean"),
        CleanupOutcome::UpToDate { recorded } => println!("Up to date (recorded {recorded})"),
        CleanupOutcome::DamagedMarker => println!("Replaced damaged version marker"),
        CleanupOutcome::Skipped => println!("Cleanup skipped; see log for details"),
    }
    Ok(())
}
