//! # stend-core - Core Domain Types
//!
//! Foundation crate for stend. Provides the error type, logging setup, the
//! inbound event model and the shared status record.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Events (`events`)
//! - [`Event`] - Parsed inbound frame (message, system event, other)
//! - [`EventCategory`] - Category used for plugin routing
//! - [`ChatMessage`], [`SystemEvent`] - Normalized payloads
//!
//! ### Status (`status`)
//! - [`Status`] - Synchronized device/bridge/plugin status record
//! - [`DeviceState`], [`BridgeState`] - Per-dimension state machines
//! - [`StartupFailure`] - Stage-specific startup failure
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use stend_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod status;

/// Prelude for common imports used throughout all stend crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use events::{
    ChatMessage, Event, EventCategory, Participant, SystemEvent, MESSAGE_WEBHOOK_EVENT,
    SYSTEM_EVENT_TYPE,
};
pub use status::{
    BridgeState, DeviceState, StartupFailure, Status, StatusSnapshot,
};
