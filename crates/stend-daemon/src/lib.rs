//! # stend-daemon - Device and Subsystem I/O
//!
//! Everything that talks to the outside world: the `adb` device transport,
//! subsystem deployment, the WebSocket event bridge and the subsystem REST
//! client. Depends only on `stend-core`.
//!
//! ## Public API
//!
//! ### Device Transport (`transport`)
//! - [`DeviceTransport`] - Async trait for target-scoped device commands
//! - [`AdbTransport`] - `adb` executable implementation
//! - [`DeviceCommand`], [`DeviceTarget`] - Command set and endpoint
//! - [`probe_until_ready()`] - Bounded liveness polling
//!
//! ### Launcher (`launcher`)
//! - [`SubsystemLauncher`] - Push, start in place, confirm by pid
//! - [`LaunchSpec`], [`RemoteProcessHandle`]
//!
//! ### Event Bridge (`bridge`)
//! - [`EventBridge`] - Persistent WebSocket client with fixed-delay reconnect
//! - [`FrameHandler`] - Receiver of parsed frames
//!
//! ### Subsystem API (`subsystem`)
//! - [`SubsystemClient`] - Replies and REST passthrough

pub mod bridge;
pub mod launcher;
pub mod subsystem;
pub mod transport;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use bridge::{
    BridgeConfig, BridgeConnection, EventBridge, FrameHandler, LocalFrameHandler,
    DEFAULT_RECONNECT_DELAY,
};
pub use launcher::{LaunchSpec, RemoteProcessHandle, SubsystemLauncher};
pub use subsystem::SubsystemClient;
pub use transport::{
    is_transient, probe_until_ready, AdbTransport, DeviceCommand, DeviceTarget, DeviceTransport,
    LocalDeviceTransport, DEFAULT_PROBE_INTERVAL,
};
