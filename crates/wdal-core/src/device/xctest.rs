//! XCTest session channel for real devices without `devicectl` process
//! launch (before iOS 17).
//!
//! An external xctest driver (`tidevice` by default) attaches to the
//! preinstalled runner and stays alive for the whole session. The driver is
//! a supervised child: stopping the session terminates it.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{PreinstalledLaunch, XctestSession};
use crate::error::LaunchError;
use crate::process::{terminate_child, DEFAULT_GRACE};

/// Starts XCTest sessions for one device.
#[derive(Debug, Clone)]
pub struct XctestDriver {
    program: String,
    udid: String,
}

impl XctestDriver {
    pub fn new(program: impl Into<String>, udid: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            udid: udid.into(),
        }
    }

    /// `-u <udid> xctest -B <bundle id> -e KEY:VALUE ...`
    pub fn args(&self, launch: &PreinstalledLaunch) -> Vec<String> {
        let mut args = vec![
            "-u".to_string(),
            self.udid.clone(),
            "xctest".to_string(),
            "-B".to_string(),
            launch.bundle_id.clone(),
        ];
        for (key, value) in &launch.env {
            args.push("-e".to_string());
            args.push(format!("{key}:{value}"));
        }
        args
    }

    pub async fn start(&self, launch: &PreinstalledLaunch) -> Result<XctestChild, LaunchError> {
        let args = self.args(launch);
        info!(
            udid = %self.udid,
            bundle_id = %launch.bundle_id,
            "Starting an XCTest session: {} {}",
            self.program,
            args.join(" ")
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
        if let Some(stdout) = child.stdout.take() {
            log_lines(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            log_lines(stderr);
        }
        Ok(XctestChild {
            program: self.program.clone(),
            child,
        })
    }
}

/// A running xctest driver process.
#[derive(Debug)]
pub struct XctestChild {
    program: String,
    child: Child,
}

#[async_trait]
impl XctestSession for XctestChild {
    async fn stop(&mut self) {
        if let Err(e) = terminate_child(&self.program, &mut self.child, DEFAULT_GRACE).await {
            warn!(program = %self.program, "Cannot stop the XCTest session: {e}");
        }
    }
}

fn log_lines<R>(reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "xctest", "{line}");
        }
    });
}
