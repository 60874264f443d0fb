//! Launch command implementation

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use webdriver_agent_launcher_core::agent::CacheDecision;

use super::target::TargetArgs;

/// Launch the agent and keep it running
#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Session id attached to the agent proxies (default: random)
    #[arg(long)]
    session_id: Option<String>,

    /// Print the first status as compact JSON
    #[arg(long)]
    json: bool,

    /// Leave the agent running and return once it is ready
    #[arg(long)]
    no_wait: bool,

    /// Adopt an agent already running on the port when it matches this build
    #[arg(long)]
    reuse: bool,
}

pub async fn execute(target: &TargetArgs, args: LaunchArgs) -> Result<()> {
    let mut supervisor = target.supervisor(true)?;
    let session_id = args
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if supervisor.web_driver_agent_url().is_none() {
        supervisor.cleanup_obsolete_processes().await;
        if args.reuse {
            match supervisor.evaluate_cache().await {
                CacheDecision::Reused { url } => info!("Reusing running agent at {url}"),
                CacheDecision::Uninstalled { reason } => info!("Uninstalled stale agent: {reason}"),
                CacheDecision::NotRunning => {}
            }
        }
    }

    let status = match supervisor.launch(Some(session_id.clone())).await {
        Ok(status) => status,
        Err(e) => {
            supervisor.quit().await;
            return Err(e.into());
        }
    };

    let url = supervisor.url()?;
    match &status {
        Some(status) if args.json => println!("{}", serde_json::to_string(status)?),
        Some(status) => {
            println!("WebDriverAgent ready at {url} (session {session_id})");
            println!("{}", serde_json::to_string_pretty(status)?);
        }
        None => warn!("Agent at {url} did not report a status"),
    }

    if args.no_wait {
        supervisor.detach().await;
        return Ok(());
    }

    supervisor.set_fully_started(true);
    eprintln!("Press Ctrl-C to stop the agent");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {e}");
    }
    info!("Stopping WebDriverAgent");
    supervisor.quit().await;
    supervisor.set_fully_started(false);
    Ok(())
}
