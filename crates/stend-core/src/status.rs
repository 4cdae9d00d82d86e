//! Shared orchestrator status
//!
//! [`Status`] is the single synchronized record read by the control surface
//! and written only by the orchestrator and the components it drives. Each
//! dimension moves through its own small state machine; illegal transitions
//! are rejected and logged instead of applied.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

// ─────────────────────────────────────────────────────────
// Device State
// ─────────────────────────────────────────────────────────

/// Device connectivity as seen by the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    #[default]
    Unknown,
    Connecting,
    Connected,
    Error,
}

impl DeviceState {
    /// Whether moving from `self` to `next` is a legal transition
    ///
    /// `Connected` is only reachable from `Connecting`, so every path to it
    /// goes through a fresh probe. Re-entering the current state is allowed
    /// and is a no-op.
    pub fn can_transition_to(&self, next: DeviceState) -> bool {
        use DeviceState::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Unknown, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Connecting)
                | (Connected, Error)
                | (Error, Connecting)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Unknown => "unknown",
            DeviceState::Connecting => "connecting",
            DeviceState::Connected => "connected",
            DeviceState::Error => "error",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Bridge State
// ─────────────────────────────────────────────────────────

/// Event bridge connectivity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    #[default]
    Disconnected,
    Connected,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Disconnected => "disconnected",
            BridgeState::Connected => "connected",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Startup Failures
// ─────────────────────────────────────────────────────────

/// Why the last startup attempt stopped early
///
/// Each stage that can abort startup has its own variant so the control
/// surface can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StartupFailure {
    #[error("device not ready after {timeout_ms}ms")]
    ProbeTimeout { timeout_ms: u64 },

    #[error("device probe failed: {message}")]
    Probe { message: String },

    #[error("subsystem deploy failed: {message}")]
    Deploy { message: String },
}

impl StartupFailure {
    pub fn probe_timeout(timeout: Duration) -> Self {
        Self::ProbeTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            StartupFailure::ProbeTimeout { .. } | StartupFailure::Probe { .. } => "probe",
            StartupFailure::Deploy { .. } => "deploy",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Status Record
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StatusInner {
    device: DeviceState,
    bridge: BridgeState,
    plugins: Vec<String>,
    last_failure: Option<StartupFailure>,
    subsystem_pid: Option<u32>,
    updated_at: Option<DateTime<Local>>,
}

/// Point-in-time copy of [`Status`], safe to serialize and hand out
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub device: DeviceState,
    pub bridge: BridgeState,
    pub plugin_count: usize,
    pub plugins: Vec<String>,
    pub last_failure: Option<StartupFailure>,
    pub subsystem_pid: Option<u32>,
    pub updated_at: Option<DateTime<Local>>,
}

/// Synchronized status record, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct Status {
    inner: Arc<RwLock<StatusInner>>,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt a device transition, returning whether it was applied
    ///
    /// Leaving `Connected` also drops the bridge to `Disconnected` in the
    /// same critical section.
    pub fn set_device(&self, next: DeviceState) -> bool {
        let mut inner = self.write();
        let current = inner.device;
        if !current.can_transition_to(next) {
            tracing::warn!(
                "Rejected device transition {} -> {}",
                current.as_str(),
                next.as_str()
            );
            return false;
        }
        if current == next {
            return true;
        }
        inner.device = next;
        if next != DeviceState::Connected {
            inner.bridge = BridgeState::Disconnected;
        }
        inner.updated_at = Some(Local::now());
        tracing::debug!("Device state: {} -> {}", current.as_str(), next.as_str());
        true
    }

    /// Attempt a bridge transition, returning whether it was applied
    pub fn set_bridge(&self, next: BridgeState) -> bool {
        let mut inner = self.write();
        if next == BridgeState::Connected && inner.device != DeviceState::Connected {
            tracing::warn!(
                "Ignoring bridge connect while device is {}",
                inner.device.as_str()
            );
            return false;
        }
        if inner.bridge != next {
            tracing::debug!(
                "Bridge state: {} -> {}",
                inner.bridge.as_str(),
                next.as_str()
            );
            inner.bridge = next;
            inner.updated_at = Some(Local::now());
        }
        true
    }

    pub fn set_plugins(&self, names: Vec<String>) {
        let mut inner = self.write();
        inner.plugins = names;
        inner.updated_at = Some(Local::now());
    }

    pub fn record_failure(&self, failure: StartupFailure) {
        let mut inner = self.write();
        inner.last_failure = Some(failure);
        inner.updated_at = Some(Local::now());
    }

    pub fn clear_failure(&self) {
        self.write().last_failure = None;
    }

    pub fn set_subsystem_pid(&self, pid: Option<u32>) {
        self.write().subsystem_pid = pid;
    }

    pub fn device(&self) -> DeviceState {
        self.read().device
    }

    pub fn bridge(&self) -> BridgeState {
        self.read().bridge
    }

    pub fn plugin_count(&self) -> usize {
        self.read().plugins.len()
    }

    pub fn plugins(&self) -> Vec<String> {
        self.read().plugins.clone()
    }

    pub fn last_failure(&self) -> Option<StartupFailure> {
        self.read().last_failure.clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.read();
        StatusSnapshot {
            device: inner.device,
            bridge: inner.bridge,
            plugin_count: inner.plugins.len(),
            plugins: inner.plugins.clone(),
            last_failure: inner.last_failure.clone(),
            subsystem_pid: inner.subsystem_pid,
            updated_at: inner.updated_at,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StatusInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StatusInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status() {
        let status = Status::new();
        let snap = status.snapshot();
        assert_eq!(snap.device, DeviceState::Unknown);
        assert_eq!(snap.bridge, BridgeState::Disconnected);
        assert_eq!(snap.plugin_count, 0);
        assert!(snap.last_failure.is_none());
    }

    #[test]
    fn test_device_cannot_jump_to_connected() {
        let status = Status::new();
        assert!(!status.set_device(DeviceState::Connected));
        assert_eq!(status.device(), DeviceState::Unknown);

        assert!(status.set_device(DeviceState::Connecting));
        assert!(status.set_device(DeviceState::Connected));
        assert_eq!(status.device(), DeviceState::Connected);
    }

    #[test]
    fn test_error_requires_new_attempt() {
        let status = Status::new();
        status.set_device(DeviceState::Connecting);
        status.set_device(DeviceState::Error);
        assert!(!status.set_device(DeviceState::Connected));
        assert!(status.set_device(DeviceState::Connecting));
        assert!(status.set_device(DeviceState::Connected));
    }

    #[test]
    fn test_bridge_requires_connected_device() {
        let status = Status::new();
        assert!(!status.set_bridge(BridgeState::Connected));
        assert_eq!(status.bridge(), BridgeState::Disconnected);

        status.set_device(DeviceState::Connecting);
        status.set_device(DeviceState::Connected);
        assert!(status.set_bridge(BridgeState::Connected));
        assert_eq!(status.bridge(), BridgeState::Connected);
    }

    #[test]
    fn test_leaving_connected_drops_bridge() {
        let status = Status::new();
        status.set_device(DeviceState::Connecting);
        status.set_device(DeviceState::Connected);
        status.set_bridge(BridgeState::Connected);

        status.set_device(DeviceState::Connecting);
        assert_eq!(status.bridge(), BridgeState::Disconnected);
    }

    #[test]
    fn test_plugins_recorded() {
        let status = Status::new();
        status.set_plugins(vec!["echo".into(), "logger".into()]);
        assert_eq!(status.plugin_count(), 2);
        assert_eq!(status.plugins(), vec!["echo", "logger"]);
    }

    #[test]
    fn test_failure_serializes_with_stage() {
        let failure = StartupFailure::probe_timeout(Duration::from_secs(2));
        assert_eq!(failure.stage(), "probe");
        let v = serde_json::to_value(&failure).unwrap();
        assert_eq!(v["stage"], "probe_timeout");
        assert_eq!(v["timeout_ms"], 2000);
    }

    #[test]
    fn test_clone_shares_state() {
        let status = Status::new();
        let other = status.clone();
        other.set_device(DeviceState::Connecting);
        assert_eq!(status.device(), DeviceState::Connecting);
    }
}
