//! Lifecycle of a bridge child process speaking the protocol over stdio.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::process::{Child, Command};
use tracing::{debug, instrument, warn};

use crate::host::{HostClient, Primitives};
use crate::io::config::HostConfig;

/// `<exe> bridge`, plus `--primitives <path>` when a custom catalog is in use.
pub fn bridge_command(exe: &Path, primitives_path: Option<&Path>) -> Command {
    let mut cmd = Command::new(exe);
    if let Some(path) = primitives_path {
        cmd.arg("--primitives").arg(path);
    }
    cmd.arg("bridge");
    cmd
}

/// A running bridge child and the host client connected to it.
pub struct BridgeProcess {
    child: Child,
    client: HostClient,
    grace: Duration,
}

impl BridgeProcess {
    /// Spawn `cmd` with piped stdin/stdout and serve `primitives` to it.
    ///
    /// Stderr is inherited so the child's tracing output stays visible.
    #[instrument(skip_all)]
    pub fn spawn(mut cmd: Command, primitives: Primitives, host: &HostConfig) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        debug!("spawning bridge process");
        let mut child = cmd.spawn().context("spawn bridge")?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;

        let client =
            HostClient::connect(stdout, stdin, primitives).with_run_timeout(host.run_timeout());
        Ok(Self {
            child,
            client,
            grace: host.shutdown_grace(),
        })
    }

    pub fn client(&self) -> &HostClient {
        &self.client
    }

    /// Send `shutdown`, then wait up to the grace period before killing the child.
    #[instrument(skip_all, fields(grace_secs = self.grace.as_secs()))]
    pub async fn shutdown(mut self) -> Result<ExitStatus> {
        if let Err(err) = self.client.shutdown() {
            warn!(%err, "could not deliver shutdown");
        }
        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("wait for bridge")?;
                debug!(exit_code = ?status.code(), "bridge exited");
                Ok(status)
            }
            Err(_) => {
                warn!("bridge did not exit in time, killing");
                self.child.kill().await.context("kill bridge")?;
                self.child.wait().await.context("wait bridge after kill")
            }
        }
    }
}
