//! Canonical home directory resolution for wdal
//!
//! Every home-relative path (global config, persisted state, the legacy
//! upgrade marker) goes through [`get_home_dir`] so tests and custom
//! deployments can redirect all of them with a single `WDAL_HOME` variable.
//!
//! # Precedence
//!
//! 1. `WDAL_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the home directory for wdal operations.
///
/// # Errors
///
/// Returns an error if `WDAL_HOME` is unset and the platform home directory
/// cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("WDAL_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}
