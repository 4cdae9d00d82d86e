//! stend - device-bridged event orchestrator
//!
//! Thin wrapper around `stend-app`: settings discovery, the `adb` transport
//! and the OS signal loop. All logic lives in the workspace crates.

pub mod runner;
pub mod signals;

pub use runner::{run, RunOptions};
