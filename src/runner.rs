//! Process runner: wires settings, the adb transport and the orchestrator

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stend_app::config::{
    config_path, init_config_dir, load_settings, load_settings_file, validate_settings,
};
use stend_app::Orchestrator;
use stend_core::prelude::*;
use stend_daemon::{AdbTransport, DeviceTarget};
use tokio::sync::mpsc;

use crate::signals::{spawn_signal_handler, ControlSignal};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit settings file; `.stend/config.toml` when `None`
    pub config_file: Option<PathBuf>,
    /// Load plugins but skip device startup
    pub no_start: bool,
}

/// Run until SIGINT/SIGTERM
pub async fn run(project_path: &Path, options: RunOptions) -> Result<()> {
    info!("Project: {}", project_path.display());

    let settings = match &options.config_file {
        Some(path) => load_settings_file(path),
        None => {
            if !config_path(project_path).exists() {
                if let Err(e) = init_config_dir(project_path) {
                    warn!("Could not write default config: {}", e);
                }
            }
            load_settings(project_path)
        }
    };
    validate_settings(&settings)?;

    let transport = AdbTransport::locate(
        settings.device.adb_path.as_deref(),
        DeviceTarget::new(settings.device.target.clone()),
    )?;
    info!("Using adb at {}", transport.adb_path().display());

    let orchestrator = Orchestrator::new(Arc::new(transport), settings, project_path)?;

    let _watcher = if orchestrator.settings().plugins.watch {
        match orchestrator.watch_plugins() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Plugin watcher disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let startup_task = if options.no_start {
        let names = orchestrator.reload_plugins().await;
        info!("Startup skipped; {} plugin(s) loaded", names.len());
        None
    } else {
        // Startup runs off the signal loop so shutdown is never blocked by a probe
        let startup = orchestrator.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = startup.start().await {
                error!("Startup failed: {}", e);
            }
        }))
    };

    let (signal_tx, mut signal_rx) = mpsc::channel(4);
    spawn_signal_handler(signal_tx);

    while let Some(signal) = signal_rx.recv().await {
        match signal {
            ControlSignal::ReloadPlugins => {
                let names = orchestrator.reload_plugins().await;
                info!("Reloaded {} plugin(s): {:?}", names.len(), names);
            }
            ControlSignal::Shutdown => break,
        }
    }

    // A startup still probing is abandoned; stop() then tears down whatever it reached
    if let Some(task) = startup_task {
        task.abort();
    }
    orchestrator.stop().await;
    info!("Final status: {:?}", orchestrator.status());
    Ok(())
}
