//! Uninstall command implementation

use anyhow::Result;

use super::target::TargetArgs;

pub async fn execute(target: &TargetArgs) -> Result<()> {
    let supervisor = target.supervisor(true)?;
    supervisor.uninstall().await;
    println!("Removed installed WebDriverAgent runners");
    Ok(())
}
