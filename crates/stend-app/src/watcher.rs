//! Plugin directory watcher
//!
//! Watches the plugin directory for manifest changes and emits a debounced
//! [`WatchEvent`] so the orchestrator can reload the registry.

use std::path::PathBuf;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use stend_core::prelude::*;
use tokio::sync::{mpsc, oneshot};

/// Default debounce duration in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Extensions that count as plugin changes
pub const MANIFEST_EXTENSIONS: &[&str] = &["toml"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// One or more manifests were created, modified or removed
    PluginsChanged { count: usize },
    Error { message: String },
}

pub struct PluginWatcher {
    dir: PathBuf,
    debounce: Duration,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl PluginWatcher {
    pub fn new(dir: PathBuf, debounce: Duration) -> Self {
        Self {
            dir,
            debounce,
            stop_tx: None,
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Start watching; events are sent to `event_tx`
    pub fn start(&mut self, event_tx: mpsc::Sender<WatchEvent>) -> Result<()> {
        if self.is_running() {
            return Err(Error::config("plugin watcher is already running"));
        }

        let dir = self.dir.clone();
        let debounce = self.debounce;
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::task::spawn_blocking(move || {
            run_watcher(dir, debounce, event_tx, stop_rx);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for PluginWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_manifest(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
}

fn run_watcher(
    dir: PathBuf,
    debounce: Duration,
    event_tx: mpsc::Sender<WatchEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let tx = event_tx.clone();
    let debouncer_result = new_debouncer(debounce, None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let count = events
                    .iter()
                    .filter(|event| event.paths.iter().any(|p| is_manifest(p)))
                    .count();
                if count == 0 {
                    return;
                }
                debug!("Plugin watcher detected {} change(s)", count);
                let _ = tx.blocking_send(WatchEvent::PluginsChanged { count });
            }
            Err(errors) => {
                for error in errors {
                    warn!("Plugin watcher error: {:?}", error);
                    let _ = tx.blocking_send(WatchEvent::Error {
                        message: error.to_string(),
                    });
                }
            }
        }
    });

    let mut debouncer = match debouncer_result {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to create plugin watcher: {}", e);
            let _ = event_tx.blocking_send(WatchEvent::Error {
                message: format!("failed to create watcher: {e}"),
            });
            return;
        }
    };

    if let Err(e) = debouncer.watch(&dir, RecursiveMode::NonRecursive) {
        warn!("Failed to watch {}: {}", dir.display(), e);
        let _ = event_tx.blocking_send(WatchEvent::Error {
            message: e.to_string(),
        });
        return;
    }
    info!("Watching plugins: {}", dir.display());

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                info!("Plugin watcher stopping");
                break;
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}
