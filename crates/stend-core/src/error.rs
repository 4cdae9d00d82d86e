//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Device Transport Errors
    // ─────────────────────────────────────────────────────────────
    #[error("adb executable not found: {path}")]
    AdbNotFound { path: String },

    #[error("Device transport error: {message}")]
    Transport { message: String },

    #[error("Device not available: {message}")]
    DeviceUnavailable { message: String },

    #[error("Device command '{command}' timed out")]
    TransportTimeout { command: String },

    // ─────────────────────────────────────────────────────────────
    // Subsystem Launch Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Subsystem payload not found: {path}")]
    PayloadNotFound { path: PathBuf },

    #[error("Subsystem launch error: {message}")]
    Launch { message: String },

    #[error("Subsystem process '{name}' not found after {attempts} attempt(s)")]
    ProcessNotFound { name: String, attempts: u32 },

    // ─────────────────────────────────────────────────────────────
    // Bridge / Subsystem API Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Event bridge error: {message}")]
    Bridge { message: String },

    #[error("Subsystem API error: {message}")]
    Subsystem { message: String },

    #[error("Frame protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Plugin Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Plugin '{unit}' failed: {message}")]
    Plugin { unit: String, message: String },

    #[error("Failed to load plugin from {path}: {reason}")]
    PluginLoad { path: PathBuf, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Store error: {message}")]
    Store { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn device_unavailable(message: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            message: message.into(),
        }
    }

    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch {
            message: message.into(),
        }
    }

    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }

    pub fn subsystem(message: impl Into<String>) -> Self {
        Self::Subsystem {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn plugin(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            unit: unit.into(),
            message: message.into(),
        }
    }

    pub fn plugin_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PluginLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors are retried by the caller (bridge reconnects,
    /// polling during startup) or simply logged.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. }
                | Error::DeviceUnavailable { .. }
                | Error::TransportTimeout { .. }
                | Error::Bridge { .. }
                | Error::Subsystem { .. }
                | Error::Protocol { .. }
                | Error::Plugin { .. }
                | Error::PluginLoad { .. }
                | Error::ChannelSend { .. }
        )
    }

    /// Check if this error should abort the current startup attempt
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AdbNotFound { .. }
                | Error::PayloadNotFound { .. }
                | Error::Launch { .. }
                | Error::ProcessNotFound { .. }
                | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
