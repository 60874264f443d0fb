//! Alternate launch channel through the `idb` CLI.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::AlternateChannel;
use crate::bundle::parse_bundle_id;
use crate::error::LaunchError;
use crate::exec::{CommandRunner, ExecOptions};
use crate::process::{terminate_child, DEFAULT_GRACE};

/// idb forwards `IDB_`-prefixed variables to the test process.
const ENV_PREFIX: &str = "IDB_";

#[derive(Debug)]
pub struct IdbChannel {
    udid: String,
    program: String,
    runner: Arc<dyn CommandRunner>,
    run: Mutex<Option<Child>>,
}

impl IdbChannel {
    pub fn new(udid: impl Into<String>, program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            udid: udid.into(),
            program: program.into(),
            runner,
            run: Mutex::new(None),
        }
    }

    /// Arguments for `idb xctest run ui`.
    pub fn run_args(&self, app_bundle_id: &str, test_host_bundle_id: &str, test_bundle_id: &str) -> Vec<String> {
        [
            "xctest",
            "run",
            "ui",
            test_bundle_id,
            app_bundle_id,
            test_host_bundle_id,
            "--udid",
            self.udid.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

fn forward_lines<R>(reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "idb", "{line}");
        }
    });
}

#[async_trait]
impl AlternateChannel for IdbChannel {
    async fn install_xctest_bundle(&self, xctest_path: &Path) -> Result<String, LaunchError> {
        let args = vec![
            "xctest".to_string(),
            "install".to_string(),
            xctest_path.to_string_lossy().into_owned(),
            "--udid".to_string(),
            self.udid.clone(),
        ];
        self.runner
            .run(&self.program, &args, &ExecOptions::default())
            .await
            .map_err(|e| LaunchError::DeviceControl(format!("installing test bundle: {e}")))?;
        parse_bundle_id(xctest_path)
    }

    async fn run_xcuitest(
        &self,
        app_bundle_id: &str,
        test_host_bundle_id: &str,
        test_bundle_id: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<(), LaunchError> {
        let mut run = self.run.lock().await;
        if let Some(mut previous) = run.take() {
            let _ = terminate_child("idb", &mut previous, DEFAULT_GRACE).await;
        }

        let args = self.run_args(app_bundle_id, test_host_bundle_id, test_bundle_id);
        info!("Starting '{} {}'", self.program, args.join(" "));
        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            cmd.env(format!("{ENV_PREFIX}{key}"), value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr);
        }
        *run = Some(child);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(mut child) = self.run.lock().await.take() {
            if let Err(e) = terminate_child("idb", &mut child, DEFAULT_GRACE).await {
                warn!("Cannot stop the idb test run: {e}");
            }
        }
    }
}
