//! Process utilities: PID lookup by command-line pattern, signal escalation,
//! and TCP listener discovery.
//!
//! Every lookup is best-effort. A search tool that finds nothing or fails
//! outright yields an empty list; the failure is logged at `debug` and never
//! propagated.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::task::JoinSet;
use tracing::debug;

use crate::exec::{argv, CommandRunner, ExecError, ExecOptions};

/// Signals tried in order by [`ProcessTools::kill_matching`].
pub const ESCALATION: [&str; 3] = ["INT", "TERM", "KILL"];

/// Pause between signal escalations.
pub const ESCALATION_BACKOFF: Duration = Duration::from_millis(100);

/// Grace period [`terminate_child`] allows after SIGTERM.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(1000);

/// Command-line filter applied to port listeners.
pub type CommandFilter = dyn Fn(&str) -> bool + Send + Sync;

/// Host process helpers built on a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct ProcessTools {
    runner: Arc<dyn CommandRunner>,
}

impl ProcessTools {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// PIDs whose full command line matches `pattern`.
    ///
    /// With `multi` unset only the newest match is returned.
    pub async fn find_pids(&self, pattern: &str, multi: bool, ignore_case: bool) -> Vec<u32> {
        let mut flags = String::from("-f");
        if ignore_case {
            flags.push('i');
        }
        if !multi {
            flags.push('n');
        }
        let args = argv([flags.as_str(), pattern]);
        match self.runner.run("pgrep", &args, &ExecOptions::default()).await {
            Ok(out) => parse_pids(&out.stdout),
            // pgrep exits 1 when nothing matched
            Err(ExecError::NonZero { code: Some(1), .. }) => Vec::new(),
            Err(e) => {
                debug!(pattern, error = %e, "process search failed");
                Vec::new()
            }
        }
    }

    /// Send INT, TERM, then KILL to every process matching `pattern`,
    /// re-checking after each step. Returns true once nothing matches.
    pub async fn kill_matching(&self, pattern: &str) -> bool {
        for signal in ESCALATION {
            let pids = self.find_pids(pattern, true, true).await;
            if pids.is_empty() {
                return true;
            }
            debug!(pattern, signal, ?pids, "signalling processes");
            self.signal_pids(&pids, signal).await;
            tokio::time::sleep(ESCALATION_BACKOFF).await;
        }
        self.find_pids(pattern, true, true).await.is_empty()
    }

    /// Deliver `signal` to `pids`. Delivery errors are logged and ignored:
    /// the process may already be gone.
    pub async fn signal_pids(&self, pids: &[u32], signal: &str) {
        if pids.is_empty() {
            return;
        }
        let mut args = vec![format!("-{signal}")];
        args.extend(pids.iter().map(u32::to_string));
        if let Err(e) = self.runner.run("kill", &args, &ExecOptions::default()).await {
            debug!(signal, ?pids, error = %e, "signal delivery failed");
        }
    }

    /// PIDs listening on TCP `port`. When `filter` is given, only PIDs whose
    /// command line it accepts are kept.
    pub async fn listeners_on_port(&self, port: u16, filter: Option<&CommandFilter>) -> Vec<u32> {
        let args = argv(["-ti".to_string(), format!("tcp:{port}")]);
        let pids = match self.runner.run("lsof", &args, &ExecOptions::default()).await {
            Ok(out) => parse_pids(&out.stdout),
            Err(ExecError::NonZero { code: Some(1), .. }) => Vec::new(),
            Err(e) => {
                debug!(port, error = %e, "listener lookup failed");
                Vec::new()
            }
        };
        let Some(filter) = filter else {
            return pids;
        };

        let mut kept = Vec::new();
        for pid in pids {
            match self.command_line(pid).await {
                Some(cmdline) if filter(&cmdline) => kept.push(pid),
                Some(_) => {}
                None => debug!(pid, "could not read command line"),
            }
        }
        kept
    }

    /// Full command line of `pid`, if the process still exists.
    pub async fn command_line(&self, pid: u32) -> Option<String> {
        let args = argv(["-p".to_string(), pid.to_string(), "-o".into(), "command".into()]);
        let out = self
            .runner
            .run("ps", &args, &ExecOptions::default())
            .await
            .ok()?;
        // first line is the column header
        let line = out.stdout.lines().skip(1).find(|l| !l.trim().is_empty())?;
        Some(line.trim().to_string())
    }

    /// Kill leftover `xcodebuild` runs for `udid`, plus the XCTest runner
    /// processes a simulator leaves behind. Patterns are handled concurrently.
    pub async fn reset_test_processes(&self, udid: &str, is_simulator: bool) {
        let mut patterns = vec![format!("xcodebuild.*{udid}")];
        if is_simulator {
            patterns.push(format!("{udid}.*XCTRunner"));
            patterns.push(format!("xctest.*{udid}"));
        }
        debug!(udid, ?patterns, "resetting test processes");

        let mut set = JoinSet::new();
        for pattern in patterns {
            let tools = self.clone();
            set.spawn(async move { tools.kill_matching(&pattern).await });
        }
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                debug!(error = %e, "test process reset task failed");
            }
        }
    }
}

fn parse_pids(stdout: &str) -> Vec<u32> {
    stdout
        .split_whitespace()
        .filter_map(|token| token.parse::<u32>().ok())
        .collect()
}

// ── Tracked child shutdown ───────────────────────────────────────────────────

/// Stop a tracked child: SIGTERM to its process group, wait up to `grace`,
/// then SIGKILL. A child that is already gone counts as success.
pub async fn terminate_child(name: &str, child: &mut Child, grace: Duration) -> std::io::Result<()> {
    if let Some(status) = child.try_wait()? {
        debug!(name, ?status, "process already exited");
        return Ok(());
    }
    let Some(pid) = child.id() else {
        return Ok(());
    };

    debug!(name, pid, "sending SIGTERM");
    send_term(pid);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(name, pid, ?status, "process exited after SIGTERM");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            debug!(name, pid, grace_ms = grace.as_millis() as u64, "escalating to SIGKILL");
            match child.kill().await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(e),
            }
        }
    }
}

#[cfg(unix)]
fn send_term(pid: u32) {
    let pid = pid as libc::pid_t;
    // SAFETY: plain signal delivery; the child leads its own process group.
    let group = unsafe { libc::kill(-pid, libc::SIGTERM) };
    if group != 0 {
        // SAFETY: as above, falling back to the single process.
        unsafe { libc::kill(pid, libc::SIGTERM) };
    }
}

#[cfg(not(unix))]
fn send_term(_pid: u32) {}
