//! Device transport: `adb` commands scoped to a single target

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use stend_core::prelude::*;
use tokio::process::Command;
use tokio::time::timeout;

/// Default interval between liveness probes
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for a single transport command
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Output adb prints while a device is not (yet) usable
static TRANSIENT_DEVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(device offline|device '.*' not found|device .* not found|no devices/emulators found|device unauthorized|device still (connecting|authorizing)|cannot connect to)")
        .expect("transient device regex is valid")
});

// ─────────────────────────────────────────────────────────
// Target & Commands
// ─────────────────────────────────────────────────────────

/// The single device endpoint every command is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceTarget(String);

impl DeviceTarget {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Commands understood by a [`DeviceTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Attach a network device (`adb connect`); the only unscoped command
    Connect,
    /// Liveness probe, output is `device` when ready
    GetState,
    Push {
        local: PathBuf,
        remote: String,
    },
    /// Start a JVM entry point in place, detached, output to a remote log
    Exec {
        classpath: String,
        entry_point: String,
        log_path: String,
    },
    Forward {
        local: u16,
        remote: u16,
    },
    Pidof(String),
    Pkill(String),
    /// Arbitrary remote shell command
    Shell(String),
}

impl DeviceCommand {
    /// Build the `adb` argument list for this command against `target`
    pub fn to_args(&self, target: &DeviceTarget) -> Vec<String> {
        let scoped = |rest: Vec<String>| {
            let mut args = vec!["-s".to_string(), target.to_string()];
            args.extend(rest);
            args
        };

        match self {
            DeviceCommand::Connect => vec!["connect".to_string(), target.to_string()],
            DeviceCommand::GetState => scoped(vec!["get-state".into()]),
            DeviceCommand::Push { local, remote } => scoped(vec![
                "push".into(),
                local.display().to_string(),
                remote.clone(),
            ]),
            DeviceCommand::Exec {
                classpath,
                entry_point,
                log_path,
            } => scoped(vec![
                "shell".into(),
                format!(
                    "export CLASSPATH={classpath}; app_process /system/bin {entry_point} > {log_path} 2>&1 &"
                ),
            ]),
            DeviceCommand::Forward { local, remote } => scoped(vec![
                "forward".into(),
                format!("tcp:{local}"),
                format!("tcp:{remote}"),
            ]),
            DeviceCommand::Pidof(name) => scoped(vec!["shell".into(), format!("pidof {name}")]),
            DeviceCommand::Pkill(pattern) => {
                scoped(vec!["shell".into(), format!("pkill -f {pattern}")])
            }
            DeviceCommand::Shell(cmd) => scoped(vec!["shell".into(), cmd.clone()]),
        }
    }

    /// Short name for logging
    pub fn description(&self) -> &'static str {
        match self {
            DeviceCommand::Connect => "connect",
            DeviceCommand::GetState => "get-state",
            DeviceCommand::Push { .. } => "push",
            DeviceCommand::Exec { .. } => "exec",
            DeviceCommand::Forward { .. } => "forward",
            DeviceCommand::Pidof(_) => "pidof",
            DeviceCommand::Pkill(_) => "pkill",
            DeviceCommand::Shell(_) => "shell",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────

/// Issues commands to one device endpoint
#[trait_variant::make(DeviceTransport: Send)]
pub trait LocalDeviceTransport {
    /// The endpoint this transport is bound to
    fn target(&self) -> &DeviceTarget;

    /// Run a command and return its trimmed output
    ///
    /// Conditions where the device is merely not visible yet come back as
    /// [`Error::DeviceUnavailable`].
    async fn execute(&self, command: &DeviceCommand) -> Result<String>;
}

/// Whether an error only means "device not ready yet"
pub fn is_transient(err: &Error) -> bool {
    match err {
        Error::DeviceUnavailable { .. } | Error::TransportTimeout { .. } => true,
        Error::Transport { message } => is_transient_output(message),
        _ => false,
    }
}

/// Whether adb output text describes a not-yet-visible device
pub fn is_transient_output(text: &str) -> bool {
    TRANSIENT_DEVICE_RE.is_match(text)
}

/// Poll `get-state` every `interval` until the device reports ready
///
/// Returns `Ok(false)` once `limit` elapses. Transient failures count as
/// "not ready"; any other failure ends polling with that error.
pub async fn probe_until_ready<T>(transport: &T, limit: Duration, interval: Duration) -> Result<bool>
where
    T: DeviceTransport + Sync + ?Sized,
{
    let target = transport.target().clone();
    let poll = async {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match transport.execute(&DeviceCommand::GetState).await {
                Ok(state) if state.trim() == "device" => {
                    debug!("Device {} ready after {} probe(s)", target, attempt);
                    return Ok(true);
                }
                Ok(state) => {
                    trace!("Device {} state '{}', waiting", target, state.trim());
                }
                Err(e) if is_transient(&e) => {
                    trace!("Device {} not visible yet: {}", target, e);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(interval).await;
        }
    };

    match timeout(limit, poll).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Device {} not ready within {:?}", target, limit);
            Ok(false)
        }
    }
}

// ─────────────────────────────────────────────────────────
// adb Implementation
// ─────────────────────────────────────────────────────────

/// [`DeviceTransport`] backed by the `adb` executable
#[derive(Debug, Clone)]
pub struct AdbTransport {
    adb: PathBuf,
    target: DeviceTarget,
    command_timeout: Duration,
}

impl AdbTransport {
    pub fn new(adb: impl Into<PathBuf>, target: DeviceTarget) -> Self {
        Self {
            adb: adb.into(),
            target,
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    /// Resolve `adb` from an explicit path or `PATH`
    pub fn locate(configured: Option<&Path>, target: DeviceTarget) -> Result<Self> {
        let adb = match configured {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => {
                return Err(Error::AdbNotFound {
                    path: path.display().to_string(),
                })
            }
            None => which::which("adb").map_err(|_| Error::AdbNotFound {
                path: "adb (PATH)".to_string(),
            })?,
        };
        debug!("Using adb at {}", adb.display());
        Ok(Self::new(adb, target))
    }

    pub fn with_command_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = limit;
        self
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb
    }

    async fn run(&self, command: &DeviceCommand) -> Result<String> {
        let args = command.to_args(&self.target);
        debug!("adb {}", args.join(" "));

        let output = Command::new(&self.adb)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::AdbNotFound {
                        path: self.adb.display().to_string(),
                    }
                } else {
                    Error::transport(format!("Failed to run adb {}: {}", command.description(), e))
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let text = if stderr.is_empty() { &stdout } else { &stderr };
            if is_transient_output(text) {
                return Err(Error::device_unavailable(text.clone()));
            }
            return Err(Error::transport(format!(
                "adb {} exited with {:?}: {}",
                command.description(),
                output.status.code(),
                text
            )));
        }

        // adb sometimes reports a missing device on a zero exit code
        if stdout.is_empty() && is_transient_output(&stderr) {
            return Err(Error::device_unavailable(stderr));
        }

        Ok(if stdout.is_empty() { stderr } else { stdout })
    }
}

impl DeviceTransport for AdbTransport {
    fn target(&self) -> &DeviceTarget {
        &self.target
    }

    async fn execute(&self, command: &DeviceCommand) -> Result<String> {
        timeout(self.command_timeout, self.run(command))
            .await
            .map_err(|_| Error::TransportTimeout {
                command: command.description().to_string(),
            })?
    }
}
