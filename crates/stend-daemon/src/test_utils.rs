//! Test utilities for device transport consumers
//!
//! [`FakeTransport`] is a scripted [`DeviceTransport`] that records every
//! command it receives and keeps the active port forwards the way adb does:
//! forwarding a local port that is already bound replaces the old rule.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use stend_core::{Error, Result};

use crate::transport::{DeviceCommand, DeviceTarget, DeviceTransport};

#[derive(Debug, Default)]
struct FakeState {
    commands: Vec<DeviceCommand>,
    /// local -> remote
    forwards: BTreeMap<u16, u16>,
    probes: usize,
}

/// Scripted device transport
#[derive(Debug)]
pub struct FakeTransport {
    target: DeviceTarget,
    /// Probes that fail transiently before the device reports ready;
    /// `None` means never ready
    ready_after: Option<usize>,
    pid: Option<u32>,
    failures: HashMap<&'static str, String>,
    delays: HashMap<&'static str, Duration>,
    shell_output: String,
    state: Mutex<FakeState>,
}

impl FakeTransport {
    /// Device that is ready on the first probe and reports pid 1234
    pub fn ready() -> Self {
        Self {
            target: DeviceTarget::new("fake:5555"),
            ready_after: Some(0),
            pid: Some(1234),
            failures: HashMap::new(),
            delays: HashMap::new(),
            shell_output: String::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Device that never becomes visible
    pub fn never_ready() -> Self {
        Self {
            ready_after: None,
            ..Self::ready()
        }
    }

    /// Fail the first `probes` liveness probes with a transient error
    pub fn ready_after(mut self, probes: usize) -> Self {
        self.ready_after = Some(probes);
        self
    }

    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = DeviceTarget::new(target);
        self
    }

    /// Output returned for [`DeviceCommand::Shell`]
    pub fn with_shell_output(mut self, output: &str) -> Self {
        self.shell_output = output.to_string();
        self
    }

    /// Make every command of the given kind fail with a non-transient error
    pub fn fail_on(mut self, kind: &'static str, message: &str) -> Self {
        self.failures.insert(kind, message.to_string());
        self
    }

    /// Make every command of the given kind take `delay` before answering
    pub fn with_delay(mut self, kind: &'static str, delay: Duration) -> Self {
        self.delays.insert(kind, delay);
        self
    }

    /// Every command received so far, in order
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.lock().commands.clone()
    }

    /// Number of received commands of the given kind
    pub fn count(&self, kind: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.description() == kind)
            .count()
    }

    /// Active `(local, remote)` port forwards, ordered by local port
    pub fn forwards(&self) -> Vec<(u16, u16)> {
        self.lock()
            .forwards
            .iter()
            .map(|(local, remote)| (*local, *remote))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceTransport for FakeTransport {
    fn target(&self) -> &DeviceTarget {
        &self.target
    }

    async fn execute(&self, command: &DeviceCommand) -> Result<String> {
        if let Some(delay) = self.delays.get(command.description()) {
            tokio::time::sleep(*delay).await;
        }

        let mut state = self.lock();
        state.commands.push(command.clone());

        if let Some(message) = self.failures.get(command.description()) {
            return Err(Error::transport(message.clone()));
        }

        match command {
            DeviceCommand::GetState => {
                state.probes += 1;
                match self.ready_after {
                    Some(n) if state.probes > n => Ok("device".to_string()),
                    _ => Err(Error::device_unavailable(format!(
                        "error: device '{}' not found",
                        self.target
                    ))),
                }
            }
            DeviceCommand::Forward { local, remote } => {
                state.forwards.insert(*local, *remote);
                Ok(local.to_string())
            }
            DeviceCommand::Pidof(name) => match self.pid {
                Some(pid) => Ok(pid.to_string()),
                None => Err(Error::transport(format!("pidof {name}: exit 1"))),
            },
            DeviceCommand::Connect => Ok(format!("connected to {}", self.target)),
            DeviceCommand::Shell(_) => Ok(self.shell_output.clone()),
            DeviceCommand::Push { .. } | DeviceCommand::Exec { .. } | DeviceCommand::Pkill(_) => {
                Ok(String::new())
            }
        }
    }
}
