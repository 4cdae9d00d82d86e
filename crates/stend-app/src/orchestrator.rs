//! Orchestrator - startup state machine and event wiring
//!
//! The orchestrator owns the shared [`Status`] and drives every other
//! component. Startup runs in stages, each gated on the previous:
//!
//! ```text
//! reset ──► 1. probe ──► 2. deploy ──► 3. forward ──► 4. plugins ──► 5. bridge
//!              │             │          (best-effort)
//!              ▼             ▼
//!        device=error   device=error
//!        (abort)        (abort)
//! ```
//!
//! Only stages 1 and 2 make [`Orchestrator::start`] return an error. Calling
//! `start` again at any point is safe: the bridge is stopped first and the
//! process handle is marked stale until the next deploy confirms it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use stend_core::prelude::*;
use stend_core::{
    BridgeState, DeviceState, Event, StartupFailure, Status, StatusSnapshot,
};
use stend_daemon::{
    probe_until_ready, BridgeConfig, BridgeConnection, DeviceCommand, DeviceTransport,
    EventBridge, FrameHandler, LaunchSpec, RemoteProcessHandle, SubsystemClient,
    SubsystemLauncher,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{Settings, SubsystemSettings};
use crate::plugin::{PluginContext, PluginEngine, PluginFactories, PluginLoader};
use crate::shared_state::SharedState;
use crate::store::PersistentStore;
use crate::watcher::{PluginWatcher, WatchEvent};
use crate::webhook::WebhookRegistry;

/// What a successful [`Orchestrator::start`] brought up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub pid: Option<u32>,
    pub plugins: Vec<String>,
}

// ─────────────────────────────────────────────────────────
// Dispatcher (bridge callback)
// ─────────────────────────────────────────────────────────

/// Bridge callback: parse, dispatch to plugins, fan out to webhooks
struct Dispatcher {
    engine: Arc<PluginEngine>,
    webhooks: WebhookRegistry,
    status: Status,
    forward_messages: bool,
}

impl FrameHandler for Dispatcher {
    async fn handle_frame(&self, frame: Value) {
        let event = match Event::from_value(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return;
            }
        };

        if let Some(category) = event.category() {
            let report = self.engine.dispatch(category, &event).await;
            trace!(
                "Dispatched {}: {} delivered, {} failed",
                category,
                report.delivered.len(),
                report.failed.len()
            );
        }

        // Webhook receivers get the frame exactly as received
        let forward = match &event {
            Event::SystemEvent(_) => true,
            Event::Message(_) => self.forward_messages,
            Event::Other(_) => false,
        };
        if let Some(name) = event.webhook_name().filter(|_| forward) {
            self.webhooks.trigger(name, event.raw());
        }
    }

    fn on_connection_change(&self, state: BridgeConnection) {
        let next = match state {
            BridgeConnection::Connected => BridgeState::Connected,
            BridgeConnection::Connecting | BridgeConnection::Stopped => BridgeState::Disconnected,
        };
        self.status.set_bridge(next);
    }
}

// ─────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────

struct Inner<T> {
    settings: Settings,
    project_dir: PathBuf,
    status: Status,
    transport: Arc<T>,
    launcher: SubsystemLauncher<T>,
    bridge: EventBridge,
    engine: Arc<PluginEngine>,
    webhooks: WebhookRegistry,
    subsystem: SubsystemClient,
    store: PersistentStore,
    shared: SharedState,
    process: Mutex<RemoteProcessHandle>,
    /// Serializes overlapping `start` calls
    startup: tokio::sync::Mutex<()>,
}

/// Cheap-to-clone handle; clones share all state
pub struct Orchestrator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Orchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Orchestrator<T>
where
    T: DeviceTransport + Send + Sync + 'static,
{
    /// Build from settings, opening the store and using the built-in plugin kinds
    ///
    /// Relative paths in `settings` are resolved against `project_dir`.
    pub fn new(transport: Arc<T>, settings: Settings, project_dir: &Path) -> Result<Self> {
        let store = PersistentStore::open(&project_dir.join(&settings.store.path))?;
        Self::with_parts(
            transport,
            settings,
            project_dir,
            PluginFactories::builtin(),
            store,
        )
    }

    pub fn with_parts(
        transport: Arc<T>,
        settings: Settings,
        project_dir: &Path,
        factories: PluginFactories,
        store: PersistentStore,
    ) -> Result<Self> {
        let subsystem = SubsystemClient::new(&settings.subsystem.api_url)?;
        let shared = SharedState::new();

        let webhooks =
            WebhookRegistry::new(settings.webhooks.timeout(), settings.webhooks.max_concurrent)?;
        for url in &settings.webhooks.urls {
            webhooks.subscribe(url)?;
        }

        let loader = PluginLoader::new(
            factories,
            PluginContext {
                subsystem: subsystem.clone(),
                store: store.clone(),
                shared: shared.clone(),
            },
        );
        let engine = Arc::new(
            PluginEngine::new(loader).with_handler_timeout(settings.plugins.handler_timeout()),
        );

        let bridge = EventBridge::new(
            BridgeConfig::new(settings.bridge.url.clone())
                .with_reconnect_delay(settings.bridge.reconnect_delay()),
        );
        let launcher = SubsystemLauncher::new(
            Arc::clone(&transport),
            launch_spec(&settings.subsystem),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                project_dir: project_dir.to_path_buf(),
                status: Status::new(),
                transport,
                launcher,
                bridge,
                engine,
                webhooks,
                subsystem,
                store,
                shared,
                process: Mutex::new(RemoteProcessHandle::empty()),
                startup: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Run the full startup sequence
    pub async fn start(&self) -> Result<StartupReport> {
        let inner = &self.inner;
        let _guard = inner.startup.lock().await;
        info!("Startup: target {}", inner.transport.target());

        // Reset: whatever ran before is no longer trusted
        inner.bridge.stop().await;
        self.lock_process().mark_stale();
        inner.status.set_subsystem_pid(None);
        inner.status.clear_failure();
        inner.status.set_device(DeviceState::Connecting);

        // Connect and probe share one readiness budget
        let timeout = inner.settings.device.probe_timeout();
        let deadline = Instant::now() + timeout;

        if inner.settings.device.connect {
            match tokio::time::timeout_at(
                deadline,
                inner.transport.execute(&DeviceCommand::Connect),
            )
            .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("adb connect failed, probing anyway: {}", e),
                Err(_) => warn!("adb connect did not finish within {:?}", timeout),
            }
        }

        // Stage 1: probe
        match probe_until_ready(
            inner.transport.as_ref(),
            deadline.saturating_duration_since(Instant::now()),
            inner.settings.device.probe_interval(),
        )
        .await
        {
            Ok(true) => {
                inner.status.set_device(DeviceState::Connected);
            }
            Ok(false) => {
                let failure = StartupFailure::probe_timeout(timeout);
                let err = Error::device_unavailable(failure.to_string());
                self.fail_startup(failure);
                return Err(err);
            }
            Err(e) => {
                self.fail_startup(StartupFailure::Probe {
                    message: e.to_string(),
                });
                return Err(e);
            }
        }

        // Stage 2: deploy + launch
        let payload = self.resolve(&inner.settings.subsystem.payload);
        let handle = match inner.launcher.deploy(&payload).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail_startup(StartupFailure::Deploy {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        let pid = handle.pid;
        inner.status.set_subsystem_pid(pid);
        *self.lock_process() = handle;

        // Stage 3: forward (best-effort)
        let (local, remote) = (
            inner.settings.subsystem.local_port,
            inner.settings.subsystem.remote_port,
        );
        if let Err(e) = inner.launcher.forward_port(local, remote).await {
            warn!("Port forward tcp:{} -> tcp:{} failed: {}", local, remote, e);
        }

        // Stage 4: plugins
        let plugins = self.reload_plugins().await;

        // Stage 5: bridge
        inner.bridge.start(Arc::new(Dispatcher {
            engine: Arc::clone(&inner.engine),
            webhooks: inner.webhooks.clone(),
            status: inner.status.clone(),
            forward_messages: inner.settings.webhooks.forward_messages,
        }));

        info!("Startup complete: pid {:?}, {} plugin(s)", pid, plugins.len());
        Ok(StartupReport { pid, plugins })
    }

    /// Reload the plugin directory, replacing the registry
    pub async fn reload_plugins(&self) -> Vec<String> {
        let dir = self.plugin_dir();
        let names = self.inner.engine.load(&dir).await;
        self.inner.status.set_plugins(names.clone());
        names
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.status.snapshot()
    }

    /// Stop the bridge; safe when startup never ran
    ///
    /// Waits for an in-progress [`start`](Self::start) so it cannot bring
    /// the bridge up after this returns.
    pub async fn stop(&self) {
        let _guard = self.inner.startup.lock().await;
        self.inner.bridge.stop().await;
        self.inner.status.set_bridge(BridgeState::Disconnected);
        info!("Orchestrator stopped");
    }

    /// Run a shell command on the device, returning trimmed output
    pub async fn shell(&self, command: &str) -> Result<String> {
        self.inner
            .transport
            .execute(&DeviceCommand::Shell(command.to_string()))
            .await
    }

    /// Watch the plugin directory and reload on manifest changes
    ///
    /// Reloading stops when the returned watcher is stopped or dropped.
    pub fn watch_plugins(&self) -> Result<PluginWatcher> {
        let mut watcher = PluginWatcher::new(self.plugin_dir(), self.inner.settings.plugins.debounce());
        let (tx, mut rx) = mpsc::channel(16);
        watcher.start(tx)?;

        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    WatchEvent::PluginsChanged { count } => {
                        info!("{} plugin manifest change(s), reloading", count);
                        this.reload_plugins().await;
                    }
                    WatchEvent::Error { message } => warn!("Plugin watcher: {}", message),
                }
            }
        });

        Ok(watcher)
    }

    pub fn process_handle(&self) -> RemoteProcessHandle {
        self.lock_process().clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn plugin_engine(&self) -> &PluginEngine {
        &self.inner.engine
    }

    pub fn webhooks(&self) -> &WebhookRegistry {
        &self.inner.webhooks
    }

    pub fn subsystem(&self) -> &SubsystemClient {
        &self.inner.subsystem
    }

    pub fn store(&self) -> &PersistentStore {
        &self.inner.store
    }

    pub fn shared(&self) -> &SharedState {
        &self.inner.shared
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.inner.bridge
    }

    fn fail_startup(&self, failure: StartupFailure) {
        error!("Startup failed at {} stage: {}", failure.stage(), failure);
        self.inner.status.set_device(DeviceState::Error);
        self.inner.status.record_failure(failure);
    }

    fn plugin_dir(&self) -> PathBuf {
        self.resolve(&self.inner.settings.plugins.dir)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.inner.project_dir.join(path)
    }

    fn lock_process(&self) -> std::sync::MutexGuard<'_, RemoteProcessHandle> {
        self.inner.process.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn launch_spec(settings: &SubsystemSettings) -> LaunchSpec {
    LaunchSpec {
        remote_path: settings.remote_path.clone(),
        entry_point: settings.entry_point.clone(),
        process_name: settings.process_name.clone(),
        remote_log: settings.remote_log.clone(),
        settle_delay: std::time::Duration::from_millis(settings.settle_ms),
        pid_attempts: settings.pid_attempts,
        pid_retry_interval: std::time::Duration::from_millis(settings.pid_retry_ms),
    }
}
