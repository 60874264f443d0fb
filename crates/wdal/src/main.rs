//! wdal - launch and supervise WebDriverAgent on iOS and tvOS targets
//!
//! A thin CLI over `webdriver-agent-launcher-core`: builds or reuses the
//! runner, waits for its `/status` endpoint, and tears it down again.

use clap::Parser;
use webdriver_agent_launcher_core::logging;

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        logging::init_with_level(tracing::Level::DEBUG);
    } else {
        logging::init();
    }

    if let Err(e) = cli.execute().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
