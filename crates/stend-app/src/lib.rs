//! stend-app - Configuration, plugins and orchestration for stend
//!
//! Builds on `stend-daemon` to run the startup state machine, load plugin
//! units from manifests, fan events out to webhooks and keep the persistent
//! and in-memory stores.
//!
//! ## Public API
//!
//! ### Orchestration (`orchestrator`)
//! - [`Orchestrator`] - Staged startup, plugin reload, status, shutdown
//! - [`StartupReport`] - Result of a successful startup
//!
//! ### Plugins (`plugin`, `watcher`)
//! - [`PluginEngine`] - Registry snapshot + isolated dispatch
//! - [`PluginUnit`] - Handler set trait
//! - [`PluginLoader`], [`PluginFactories`] - Manifest -> unit construction
//! - [`PluginWatcher`] - Debounced reload on manifest changes
//!
//! ### Stores and Fan-out
//! - [`PersistentStore`] - SQLite-backed key/value store
//! - [`SharedState`] - In-memory map shared with plugins
//! - [`WebhookRegistry`] - Snapshot fan-out to subscribed URLs
//!
//! ### Configuration (`config`)
//! - [`Settings`] - `.stend/config.toml`

pub mod config;
pub mod orchestrator;
pub mod plugin;
pub mod shared_state;
pub mod store;
pub mod watcher;
pub mod webhook;

pub use config::Settings;
pub use orchestrator::{Orchestrator, StartupReport};
pub use plugin::{
    DispatchReport, PluginContext, PluginEngine, PluginFactories, PluginLoader, PluginManifest,
    PluginUnit,
};
pub use shared_state::SharedState;
pub use store::PersistentStore;
pub use watcher::{PluginWatcher, WatchEvent};
pub use webhook::{FanOut, WebhookRegistry};
