//! Configuration types for stend
//!
//! Defines `Settings` and one struct per `.stend/config.toml` section.
//! Every field has a default so a partial file is always valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global settings from `.stend/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub subsystem: SubsystemSettings,

    #[serde(default)]
    pub bridge: BridgeSettings,

    #[serde(default)]
    pub plugins: PluginSettings,

    #[serde(default)]
    pub webhooks: WebhookSettings,

    #[serde(default)]
    pub store: StoreSettings,
}

// ─────────────────────────────────────────────────────────
// [device]
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceSettings {
    /// Explicit adb executable; resolved from PATH when unset
    #[serde(default)]
    pub adb_path: Option<PathBuf>,

    /// Device endpoint every command is scoped to
    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Run `adb connect <target>` before probing
    #[serde(default = "default_true")]
    pub connect: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            adb_path: None,
            target: default_target(),
            probe_timeout_secs: default_probe_timeout_secs(),
            probe_interval_ms: default_probe_interval_ms(),
            connect: true,
        }
    }
}

impl DeviceSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

fn default_target() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    15
}

fn default_probe_interval_ms() -> u64 {
    1000
}

// ─────────────────────────────────────────────────────────
// [subsystem]
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubsystemSettings {
    /// Local payload, relative to the project directory
    #[serde(default = "default_payload")]
    pub payload: PathBuf,

    #[serde(default = "default_remote_path")]
    pub remote_path: String,

    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    #[serde(default = "default_process_name")]
    pub process_name: String,

    #[serde(default = "default_remote_log")]
    pub remote_log: String,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_pid_attempts")]
    pub pid_attempts: u32,

    #[serde(default = "default_pid_retry_ms")]
    pub pid_retry_ms: u64,

    #[serde(default = "default_port")]
    pub local_port: u16,

    #[serde(default = "default_port")]
    pub remote_port: u16,

    /// Base URL of the subsystem's REST surface
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for SubsystemSettings {
    fn default() -> Self {
        Self {
            payload: default_payload(),
            remote_path: default_remote_path(),
            entry_point: default_entry_point(),
            process_name: default_process_name(),
            remote_log: default_remote_log(),
            settle_ms: default_settle_ms(),
            pid_attempts: default_pid_attempts(),
            pid_retry_ms: default_pid_retry_ms(),
            local_port: default_port(),
            remote_port: default_port(),
            api_url: default_api_url(),
        }
    }
}

fn default_payload() -> PathBuf {
    PathBuf::from("Stend.apk")
}

fn default_remote_path() -> String {
    "/data/local/tmp/Stend.apk".to_string()
}

fn default_entry_point() -> String {
    "party.qwer.iris.Main".to_string()
}

fn default_process_name() -> String {
    "party.qwer.iris".to_string()
}

fn default_remote_log() -> String {
    "/data/local/tmp/stend_log.txt".to_string()
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_pid_attempts() -> u32 {
    3
}

fn default_pid_retry_ms() -> u64 {
    1000
}

fn default_port() -> u16 {
    3000
}

fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}

// ─────────────────────────────────────────────────────────
// [bridge]
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BridgeSettings {
    #[serde(default = "default_bridge_url")]
    pub url: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl BridgeSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn default_bridge_url() -> String {
    "ws://localhost:3000/ws".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

// ─────────────────────────────────────────────────────────
// [plugins]
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PluginSettings {
    /// Plugin manifest directory, relative to the project directory
    #[serde(default = "default_plugin_dir")]
    pub dir: PathBuf,

    /// Per-handler timeout; unbounded when unset
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,

    /// Reload plugins when the directory changes
    #[serde(default)]
    pub watch: bool,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            dir: default_plugin_dir(),
            handler_timeout_ms: None,
            watch: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl PluginSettings {
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_debounce_ms() -> u64 {
    crate::watcher::DEFAULT_DEBOUNCE_MS
}

// ─────────────────────────────────────────────────────────
// [webhooks]
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebhookSettings {
    /// Subscriptions registered at startup
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound on in-flight deliveries
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Also fan out message frames as `message` events
    #[serde(default = "default_true")]
    pub forward_messages: bool,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            timeout_ms: default_webhook_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            forward_messages: true,
        }
    }
}

impl WebhookSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_webhook_timeout_ms() -> u64 {
    2000
}

fn default_max_concurrent() -> usize {
    32
}

// ─────────────────────────────────────────────────────────
// [store]
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreSettings {
    /// SQLite database, relative to the project directory
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("stend_store.db")
}

fn default_true() -> bool {
    true
}
