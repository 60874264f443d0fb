//! Every home-relative path must come from `home::get_home_dir()` so that
//! `WDAL_HOME` redirects the persisted store, the legacy upgrade marker, and
//! the global config together.

use std::fs;
use std::path::{Path, PathBuf};

const FORBIDDEN: [&str; 2] = ["dirs::home_dir()", "dirs::config_dir()"];

fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(rust_files(&path));
        } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            files.push(path);
        }
    }
    files
}

fn violations_in(path: &Path) -> Vec<String> {
    if path.ends_with("home.rs") || path.ends_with("home_dir_audit.rs") {
        return Vec::new();
    }
    let content = fs::read_to_string(path).expect("Failed to read file");
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .flat_map(|(idx, line)| {
            FORBIDDEN
                .iter()
                .filter(|call| line.contains(*call))
                .map(move |call| format!("{}:{}: raw `{call}` call", path.display(), idx + 1))
        })
        .collect()
}

#[test]
fn audit_no_raw_home_dir_calls() {
    let crates_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("Failed to find crates directory");

    let files = rust_files(crates_dir);
    assert!(!files.is_empty(), "No Rust files found under {}", crates_dir.display());

    let violations: Vec<String> = files.iter().flat_map(|f| violations_in(f)).collect();
    assert!(
        violations.is_empty(),
        "use `webdriver_agent_launcher_core::home::get_home_dir()` instead:\n{}",
        violations.join("\n")
    );
}
