//! Configuration discovery and resolution

use super::types::{LauncherConfig, PlatformName};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Explicit config file; replaces the repo-local search
    pub config_path: Option<PathBuf>,
    pub udid: Option<String>,
    pub real_device: Option<bool>,
    pub platform_name: Option<PlatformName>,
    pub platform_version: Option<String>,
    pub wda_local_port: Option<u16>,
    pub web_driver_agent_url: Option<String>,
    pub bootstrap_path: Option<PathBuf>,
    pub show_xcode_log: Option<bool>,
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables
/// 3. Repo-local config (.wdal.toml in current dir or up to git root)
/// 4. Global config (~/.config/wdal/config.toml)
/// 5. Defaults
///
/// File layers are merged key by key before deserialization, so a repo
/// file setting one key does not reset the others to their defaults.
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<LauncherConfig, ConfigError> {
    let mut table = toml::Table::new();

    // 4. Global config
    let global_config_path = home_dir.join(".config/wdal/config.toml");
    if global_config_path.exists() {
        match load_table(&global_config_path) {
            Ok(file_table) => merge_tables(&mut table, file_table),
            Err(e) => warn!("Failed to parse global config at {global_config_path:?}: {e}"),
        }
    }

    // 3. Repo-local config. An explicit path must be readable.
    if let Some(ref explicit) = overrides.config_path {
        let file_table = load_table(explicit)?;
        merge_tables(&mut table, file_table);
    } else if let Some(repo_config) = find_repo_local_config(current_dir) {
        match load_table(&repo_config) {
            Ok(file_table) => merge_tables(&mut table, file_table),
            Err(e) => warn!("Failed to parse repo config at {repo_config:?}: {e}"),
        }
    }

    let mut config: LauncherConfig = toml::Value::Table(table).try_into()?;

    // 2. Environment variables
    apply_env_overrides(&mut config)?;

    // 1. Command-line overrides
    apply_cli_overrides(&mut config, overrides);

    Ok(config)
}

/// Searches current directory and parent directories up to git root
fn find_repo_local_config(current_dir: &Path) -> Option<PathBuf> {
    let mut dir = current_dir;

    loop {
        let config_path = dir.join(".wdal.toml");
        if config_path.exists() {
            return Some(config_path);
        }

        if dir.join(".git").exists() {
            break;
        }

        dir = dir.parent()?;
    }

    None
}

fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents.parse::<toml::Table>()?)
}

/// Later tables win; nested tables merge recursively.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name,
            value,
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn apply_env_overrides(config: &mut LauncherConfig) -> Result<(), ConfigError> {
    let session = &mut config.session;

    if let Some(udid) = env_var("WDAL_UDID") {
        session.udid = udid;
    }
    if let Some(version) = env_var("WDAL_PLATFORM_VERSION") {
        session.platform_version = version;
    }
    if let Some(raw) = env_var("WDAL_WDA_LOCAL_PORT") {
        let port = raw.parse::<u16>().map_err(|e| ConfigError::InvalidEnv {
            name: "WDAL_WDA_LOCAL_PORT",
            value: raw.clone(),
            reason: e.to_string(),
        })?;
        session.wda_local_port = Some(port);
    }
    if let Some(path) = env_var("WDAL_BOOTSTRAP_PATH") {
        session.bootstrap_path = Some(PathBuf::from(path));
    }
    if let Some(url) = env_var("WDAL_WEB_DRIVER_AGENT_URL") {
        session.web_driver_agent_url = Some(url);
    }
    if let Some(raw) = env_var("WDAL_TREAT_WARNINGS_AS_ERRORS") {
        config.treat_warnings_as_errors = parse_env_bool("WDAL_TREAT_WARNINGS_AS_ERRORS", raw)?;
    }
    if let Some(program) = env_var("WDAL_XCODEBUILD") {
        config.tools.xcodebuild = program;
    }
    if let Some(program) = env_var("WDAL_XCTEST") {
        config.tools.xctest = program;
    }

    Ok(())
}

fn apply_cli_overrides(config: &mut LauncherConfig, overrides: &ConfigOverrides) {
    let session = &mut config.session;

    if let Some(ref udid) = overrides.udid {
        session.udid = udid.clone();
    }
    if let Some(real_device) = overrides.real_device {
        session.real_device = real_device;
    }
    if let Some(platform) = overrides.platform_name {
        session.platform_name = platform;
    }
    if let Some(ref version) = overrides.platform_version {
        session.platform_version = version.clone();
    }
    if let Some(port) = overrides.wda_local_port {
        session.wda_local_port = Some(port);
    }
    if let Some(ref url) = overrides.web_driver_agent_url {
        session.web_driver_agent_url = Some(url.clone());
    }
    if let Some(ref path) = overrides.bootstrap_path {
        session.bootstrap_path = Some(path.clone());
    }
    if overrides.show_xcode_log.is_some() {
        session.show_xcode_log = overrides.show_xcode_log;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "WDAL_UDID",
        "WDAL_PLATFORM_VERSION",
        "WDAL_WDA_LOCAL_PORT",
        "WDAL_BOOTSTRAP_PATH",
        "WDAL_WEB_DRIVER_AGENT_URL",
        "WDAL_TREAT_WARNINGS_AS_ERRORS",
        "WDAL_XCODEBUILD",
        "WDAL_XCTEST",
    ];

    fn clear_env() {
        for name in ENV_VARS {
            unsafe { env::remove_var(name) };
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let config = resolve_config(&ConfigOverrides::default(), temp.path(), temp.path()).unwrap();

        assert_eq!(config.session.remote_port(), 8100);
        assert_eq!(config.tools.xcodebuild, "xcodebuild");
        assert!(!config.treat_warnings_as_errors);
    }

    #[test]
    #[serial]
    fn test_repo_file_merges_over_global() {
        clear_env();
        let home = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        std::fs::create_dir_all(home.path().join(".config/wdal")).unwrap();
        std::fs::write(
            home.path().join(".config/wdal/config.toml"),
            "[session]\nudid = \"GLOBAL\"\nxcode_org_id = \"TEAM1\"\n",
        )
        .unwrap();
        std::fs::write(repo.path().join(".git"), "").unwrap();
        std::fs::write(repo.path().join(".wdal.toml"), "[session]\nudid = \"REPO\"\n").unwrap();

        let nested = repo.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = resolve_config(&ConfigOverrides::default(), &nested, home.path()).unwrap();
        assert_eq!(config.session.udid, "REPO");
        assert_eq!(config.session.xcode_org_id.as_deref(), Some("TEAM1"));
    }

    #[test]
    #[serial]
    fn test_malformed_repo_config_is_skipped() {
        clear_env();
        let repo = TempDir::new().unwrap();
        std::fs::write(repo.path().join(".wdal.toml"), "invalid toml [[[").unwrap();

        let config = resolve_config(&ConfigOverrides::default(), repo.path(), repo.path()).unwrap();
        assert_eq!(config.session.udid, "");
    }

    #[test]
    #[serial]
    fn test_explicit_config_path_must_exist() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let overrides = ConfigOverrides {
            config_path: Some(temp.path().join("missing.toml")),
            ..Default::default()
        };
        let err = resolve_config(&overrides, temp.path(), temp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    #[serial]
    fn test_env_and_cli_priority() {
        clear_env();
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".wdal.toml"), "[session]\nudid = \"FILE\"\n").unwrap();

        unsafe {
            env::set_var("WDAL_UDID", "ENV");
            env::set_var("WDAL_WDA_LOCAL_PORT", "8300");
            env::set_var("WDAL_TREAT_WARNINGS_AS_ERRORS", "true");
            env::set_var("WDAL_XCTEST", "/opt/bin/tidevice");
        }

        let config = resolve_config(&ConfigOverrides::default(), temp.path(), temp.path()).unwrap();
        assert_eq!(config.session.udid, "ENV");
        assert_eq!(config.session.wda_local_port, Some(8300));
        assert!(config.treat_warnings_as_errors);
        assert_eq!(config.tools.xctest, "/opt/bin/tidevice");

        let overrides = ConfigOverrides {
            udid: Some("CLI".to_string()),
            ..Default::default()
        };
        let config = resolve_config(&overrides, temp.path(), temp.path()).unwrap();
        assert_eq!(config.session.udid, "CLI");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_port_is_an_error() {
        clear_env();
        unsafe { env::set_var("WDAL_WDA_LOCAL_PORT", "eighty") };
        let temp = TempDir::new().unwrap();
        let err = resolve_config(&ConfigOverrides::default(), temp.path(), temp.path()).unwrap_err();
        assert!(err.to_string().contains("WDAL_WDA_LOCAL_PORT"));
        clear_env();
    }

    #[test]
    fn test_merge_tables_is_recursive() {
        let mut base: toml::Table = "[a]\nx = 1\ny = 2\n".parse().unwrap();
        let overlay: toml::Table = "[a]\ny = 3\n".parse().unwrap();
        merge_tables(&mut base, overlay);
        let a = base["a"].as_table().unwrap();
        assert_eq!(a["x"].as_integer(), Some(1));
        assert_eq!(a["y"].as_integer(), Some(3));
    }
}
