//! Configuration resolution
//!
//! Resolves [`LauncherConfig`] from multiple sources with priority:
//! 1. Command-line flags (passed as [`ConfigOverrides`])
//! 2. Environment variables (`WDAL_*`)
//! 3. Repo-local config (`.wdal.toml`, or an explicit `--config` path)
//! 4. Global config (`~/.config/wdal/config.toml`)
//! 5. Defaults
//!
//! The result is read once at startup and passed down explicitly; nothing
//! below this module consults the process environment for feature flags.

mod discovery;
mod types;

pub use discovery::{resolve_config, ConfigError, ConfigOverrides};
pub use types::{LauncherConfig, PlatformName, SessionArgs, ToolsConfig};
