//! Settings loader for .stend/config.toml

use super::types::Settings;
use stend_core::prelude::*;
use std::path::{Path, PathBuf};
use url::Url;

const CONFIG_FILENAME: &str = "config.toml";
const STEND_DIR: &str = ".stend";

/// Path of the settings file for a project directory
pub fn config_path(project_path: &Path) -> PathBuf {
    project_path.join(STEND_DIR).join(CONFIG_FILENAME)
}

/// Load settings from `.stend/config.toml`
///
/// A missing or unreadable file yields defaults.
pub fn load_settings(project_path: &Path) -> Settings {
    load_settings_file(&config_path(project_path))
}

/// Load settings from an explicit file, falling back to defaults
pub fn load_settings_file(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Check values that serde cannot
pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.device.target.trim().is_empty() {
        return Err(Error::config_invalid("[device] target must not be empty"));
    }
    if settings.device.probe_interval_ms == 0 {
        return Err(Error::config_invalid(
            "[device] probe_interval_ms must be greater than 0",
        ));
    }

    let bridge = Url::parse(&settings.bridge.url)
        .map_err(|e| Error::config_invalid(format!("[bridge] url '{}': {}", settings.bridge.url, e)))?;
    if !matches!(bridge.scheme(), "ws" | "wss") {
        return Err(Error::config_invalid(format!(
            "[bridge] url must use ws:// or wss://, got '{}'",
            settings.bridge.url
        )));
    }

    Url::parse(&settings.subsystem.api_url).map_err(|e| {
        Error::config_invalid(format!(
            "[subsystem] api_url '{}': {}",
            settings.subsystem.api_url, e
        ))
    })?;

    if settings.subsystem.pid_attempts == 0 {
        return Err(Error::config_invalid(
            "[subsystem] pid_attempts must be at least 1",
        ));
    }

    for url in &settings.webhooks.urls {
        validate_webhook_url(url)?;
    }
    if settings.webhooks.max_concurrent == 0 {
        return Err(Error::config_invalid(
            "[webhooks] max_concurrent must be at least 1",
        ));
    }

    Ok(())
}

/// Webhook targets must be absolute http(s) URLs
pub fn validate_webhook_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|e| Error::config_invalid(format!("webhook url '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::config_invalid(format!(
            "webhook url must use http:// or https://, got '{url}'"
        )));
    }
    Ok(())
}

/// Create `.stend/config.toml` with commented defaults if absent
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let stend_dir = project_path.join(STEND_DIR);

    if !stend_dir.exists() {
        std::fs::create_dir_all(&stend_dir)
            .map_err(|e| Error::config(format!("Failed to create .stend dir: {}", e)))?;
    }

    let config_path = stend_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# stend configuration

[device]
# adb_path = "/opt/android/platform-tools/adb"   # default: adb from PATH
target = "127.0.0.1:5555"
probe_timeout_secs = 15
probe_interval_ms = 1000
connect = true          # run `adb connect <target>` before probing

[subsystem]
payload = "Stend.apk"   # relative to the project directory
remote_path = "/data/local/tmp/Stend.apk"
entry_point = "party.qwer.iris.Main"
process_name = "party.qwer.iris"
remote_log = "/data/local/tmp/stend_log.txt"
settle_ms = 2000
pid_attempts = 3
pid_retry_ms = 1000
local_port = 3000
remote_port = 3000
api_url = "http://localhost:3000"

[bridge]
url = "ws://localhost:3000/ws"
reconnect_delay_ms = 3000

[plugins]
dir = "plugins"
# handler_timeout_ms = 5000   # default: unbounded
watch = false
debounce_ms = 500

[webhooks]
urls = []
timeout_ms = 2000
max_concurrent = 32
forward_messages = true

[store]
path = "stend_store.db"
"#;
        std::fs::write(&config_path, default_content)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Created default config at {:?}", config_path);
    }

    Ok(())
}

/// Write settings atomically to `.stend/config.toml`
pub fn save_settings(project_path: &Path, settings: &Settings) -> Result<()> {
    let stend_dir = project_path.join(STEND_DIR);

    if !stend_dir.exists() {
        std::fs::create_dir_all(&stend_dir)
            .map_err(|e| Error::config(format!("Failed to create .stend dir: {}", e)))?;
    }

    let config_path = stend_dir.join(CONFIG_FILENAME);
    let temp_path = stend_dir.join(".config.toml.tmp");

    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;
    let full_content = format!("# stend configuration\n\n{}", content);

    std::fs::write(&temp_path, &full_content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;

    std::fs::rename(&temp_path, &config_path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved settings to {:?}", config_path);
    Ok(())
}
