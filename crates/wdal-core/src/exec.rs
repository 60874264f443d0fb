//! Command execution seam.
//!
//! Every external tool the launcher drives to completion (`pgrep`, `lsof`,
//! `kill`, `security`, `xcodebuild clean`, `xcrun`, `idb`) goes through a
//! [`CommandRunner`]. The production implementation is
//! [`SystemCommandRunner`]; tests substitute a scripted runner that records
//! invocations.
//!
//! The long-running `xcodebuild test` subprocess is *not* run through this
//! trait: it is supervised directly by [`crate::builder::XcodeBuild`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

/// Errors produced while running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The program could not be started at all.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran but exited unsuccessfully.
    #[error("'{program}' exited with code {code:?}: {stderr}")]
    NonZero {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl ExecError {
    /// Exit code of a command that ran to completion, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::NonZero { code, .. } => *code,
            Self::Spawn { .. } => None,
        }
    }
}

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl ExecOptions {
    /// Options with only a working directory set.
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Default::default()
        }
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external program to completion and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Run `program` with `args`.
    ///
    /// # Errors
    ///
    /// [`ExecError::Spawn`] when the program cannot be started,
    /// [`ExecError::NonZero`] when it exits unsuccessfully.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<ExecOutput, ExecError>;
}

/// [`CommandRunner`] backed by `tokio::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<ExecOutput, ExecError> {
        trace!(program, ?args, "exec");
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(&opts.env);
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd.output().await.map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ExecError::NonZero {
                program: program.to_string(),
                code: output.status.code(),
                stdout,
                stderr,
            });
        }
        Ok(ExecOutput { stdout, stderr })
    }
}

/// Convert borrowed string arguments into the owned form [`CommandRunner`] takes.
pub fn argv<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
