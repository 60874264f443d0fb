//! Status command implementation

use anyhow::{Result, bail};
use clap::Args;

use super::target::TargetArgs;

/// Query the agent's status endpoint
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print compact JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(target: &TargetArgs, args: StatusArgs) -> Result<()> {
    let mut supervisor = target.supervisor(false)?;
    let url = supervisor.url()?;

    let Some(status) = supervisor.get_status().await else {
        bail!("no WebDriverAgent answered at {url}");
    };

    if args.json {
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }

    println!("WebDriverAgent at {url}");
    if let Some(state) = &status.state {
        println!("  state:     {state}");
    }
    if let Some(ip) = status.device_ip() {
        println!("  device ip: {ip}");
    }
    if let Some(bundle_id) = status.product_bundle_id() {
        println!("  bundle id: {bundle_id}");
    }
    if let Some(upgraded_at) = status.upgraded_at() {
        println!("  upgraded:  {upgraded_at}");
    }
    Ok(())
}
