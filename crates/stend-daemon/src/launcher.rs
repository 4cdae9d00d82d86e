//! Subsystem deployment over a [`DeviceTransport`]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stend_core::prelude::*;

use crate::transport::{DeviceCommand, DeviceTransport};

/// Where and how the subsystem payload is deployed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Fixed staging path on the device
    pub remote_path: String,
    /// JVM entry point class started via `app_process`
    pub entry_point: String,
    /// Process name used for pid lookup
    pub process_name: String,
    /// Remote file receiving the subsystem's stdout/stderr
    pub remote_log: String,
    /// Wait after exec before the first pid lookup
    pub settle_delay: Duration,
    pub pid_attempts: u32,
    pub pid_retry_interval: Duration,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            remote_path: "/data/local/tmp/Stend.apk".to_string(),
            entry_point: "party.qwer.iris.Main".to_string(),
            process_name: "party.qwer.iris".to_string(),
            remote_log: "/data/local/tmp/stend_log.txt".to_string(),
            settle_delay: Duration::from_secs(2),
            pid_attempts: 3,
            pid_retry_interval: Duration::from_secs(1),
        }
    }
}

/// The subsystem's process on the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteProcessHandle {
    pub local_payload: Option<PathBuf>,
    pub remote_payload: Option<String>,
    pub entry_point: Option<String>,
    /// Observed pid, `None` until launch is confirmed
    pub pid: Option<u32>,
    stale: bool,
}

impl RemoteProcessHandle {
    /// Handle for a subsystem that has not been launched yet
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_confirmed(&self) -> bool {
        self.pid.is_some() && !self.stale
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Mark the pid as unverified after a reconnect or restart
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }
}

/// Pushes the payload, starts it in place and confirms the process
pub struct SubsystemLauncher<T> {
    transport: Arc<T>,
    spec: LaunchSpec,
}

impl<T> SubsystemLauncher<T>
where
    T: DeviceTransport + Sync,
{
    pub fn new(transport: Arc<T>, spec: LaunchSpec) -> Self {
        Self { transport, spec }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Deploy and start the subsystem, returning a confirmed handle
    pub async fn deploy(&self, payload: &Path) -> Result<RemoteProcessHandle> {
        if !payload.is_file() {
            return Err(Error::PayloadNotFound {
                path: payload.to_path_buf(),
            });
        }

        info!(
            "Deploying {} to {}",
            payload.display(),
            self.spec.remote_path
        );

        self.transport
            .execute(&DeviceCommand::Push {
                local: payload.to_path_buf(),
                remote: self.spec.remote_path.clone(),
            })
            .await
            .map_err(|e| Error::launch(format!("push failed: {e}")))?;

        // pkill exits non-zero when nothing matched
        if let Err(e) = self
            .transport
            .execute(&DeviceCommand::Pkill(self.spec.entry_point.clone()))
            .await
        {
            debug!("No previous instance stopped: {}", e);
        }

        self.transport
            .execute(&DeviceCommand::Exec {
                classpath: self.spec.remote_path.clone(),
                entry_point: self.spec.entry_point.clone(),
                log_path: self.spec.remote_log.clone(),
            })
            .await
            .map_err(|e| Error::launch(format!("exec failed: {e}")))?;

        tokio::time::sleep(self.spec.settle_delay).await;

        let pid = self.resolve_pid().await?;
        info!("Subsystem {} running with pid {}", self.spec.process_name, pid);

        Ok(RemoteProcessHandle {
            local_payload: Some(payload.to_path_buf()),
            remote_payload: Some(self.spec.remote_path.clone()),
            entry_point: Some(self.spec.entry_point.clone()),
            pid: Some(pid),
            stale: false,
        })
    }

    /// Forward a local TCP port to the device; re-issuing is harmless
    pub async fn forward_port(&self, local: u16, remote: u16) -> Result<()> {
        self.transport
            .execute(&DeviceCommand::Forward { local, remote })
            .await?;
        debug!("Forwarded tcp:{} -> tcp:{}", local, remote);
        Ok(())
    }

    async fn resolve_pid(&self) -> Result<u32> {
        let attempts = self.spec.pid_attempts.max(1);
        for attempt in 1..=attempts {
            match self
                .transport
                .execute(&DeviceCommand::Pidof(self.spec.process_name.clone()))
                .await
            {
                Ok(out) => {
                    if let Some(pid) = parse_pid(&out) {
                        return Ok(pid);
                    }
                    debug!("pidof attempt {}/{}: no pid in '{}'", attempt, attempts, out);
                }
                Err(e) => debug!("pidof attempt {}/{} failed: {}", attempt, attempts, e),
            }
            if attempt < attempts {
                tokio::time::sleep(self.spec.pid_retry_interval).await;
            }
        }

        Err(Error::ProcessNotFound {
            name: self.spec.process_name.clone(),
            attempts,
        })
    }
}

/// First numeric token of `pidof` output
fn parse_pid(output: &str) -> Option<u32> {
    output.split_whitespace().find_map(|tok| tok.parse().ok())
}
