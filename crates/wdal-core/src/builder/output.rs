//! Classification of `xcodebuild` output lines.
//!
//! `xcodebuild` can exit 0 while the test run has actually failed. The
//! tell is an `Error Domain=` line in its output; once one shows up the
//! build is treated as failed whatever the exit code says, and every
//! following line is kept for the failure message.

use std::path::PathBuf;

/// Errors about test attachments that say nothing about the agent.
pub const IGNORED_ERRORS: [&str; 3] = [
    "Error writing attachment data to file",
    "Error copying testing attachment",
    "Failed to remove screenshot at path",
];

pub const ERROR_MARKER: &str = "Error Domain=";

pub const DIAGNOSTIC_LOG_MARKER: &str = "Writing diagnostic log for test session to";

/// What to do with one output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
    /// Known benign noise; dropped.
    Ignored,
    /// Not surfaced.
    Quiet,
    /// Surface at error level.
    Logged,
}

#[derive(Debug, Default)]
pub struct OutputClassifier {
    show_log: Option<bool>,
    logging: bool,
    failed: bool,
    collected: Vec<String>,
    awaiting_log_path: bool,
    log_location: Option<PathBuf>,
}

impl OutputClassifier {
    /// `show_log`: `Some(true)` logs everything, `Some(false)` logs nothing,
    /// `None` starts logging at the first error marker.
    pub fn new(show_log: Option<bool>) -> Self {
        Self {
            show_log,
            logging: show_log == Some(true),
            ..Default::default()
        }
    }

    pub fn classify(&mut self, line: &str) -> LineVerdict {
        self.track_log_location(line);

        if IGNORED_ERRORS.iter().any(|e| line.contains(e)) {
            return LineVerdict::Ignored;
        }

        if line.contains(ERROR_MARKER) {
            self.failed = true;
            if self.show_log != Some(false) {
                self.logging = true;
            }
        }

        if (self.failed || self.logging) && !line.trim().is_empty() {
            self.collected.push(line.to_string());
        }
        if self.logging {
            LineVerdict::Logged
        } else {
            LineVerdict::Quiet
        }
    }

    fn track_log_location(&mut self, line: &str) {
        if let Some(pos) = line.find(DIAGNOSTIC_LOG_MARKER) {
            let rest = line[pos + DIAGNOSTIC_LOG_MARKER.len()..]
                .trim_start_matches(':')
                .trim();
            if rest.starts_with('/') {
                self.log_location = Some(PathBuf::from(rest));
            } else {
                self.awaiting_log_path = true;
            }
            return;
        }
        if self.awaiting_log_path {
            let trimmed = line.trim();
            if trimmed.starts_with('/') {
                self.log_location = Some(PathBuf::from(trimmed));
                self.awaiting_log_path = false;
            }
        }
    }

    /// True once an error marker has been seen.
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn log_location(&self) -> Option<&PathBuf> {
        self.log_location.as_ref()
    }

    /// Lines kept for the failure message, joined. Clears the buffer.
    pub fn take_collected(&mut self) -> String {
        std::mem::take(&mut self.collected).join("\n")
    }
}
