//! OS signal handling: shutdown and plugin reload

use tokio::sync::mpsc;

use stend_core::prelude::*;

/// What an OS signal asks the runner to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Shutdown,
    ReloadPlugins,
}

/// Spawn a task that forwards OS signals to the runner
///
/// SIGINT and SIGTERM request shutdown and end the task. SIGHUP requests a
/// plugin reload (unix only).
pub fn spawn_signal_handler(tx: mpsc::Sender<ControlSignal>) {
    tokio::spawn(async move {
        if let Err(e) = forward_signals(&tx).await {
            error!("Signal handler error: {}", e);
        }
    });
}

#[cfg(unix)]
async fn forward_signals(tx: &mpsc::Sender<ControlSignal>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| Error::config(format!("Failed to create SIGINT handler: {}", e)))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| Error::config(format!("Failed to create SIGTERM handler: {}", e)))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| Error::config(format!("Failed to create SIGHUP handler: {}", e)))?;

    loop {
        let received = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
                ControlSignal::Shutdown
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                ControlSignal::Shutdown
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP");
                ControlSignal::ReloadPlugins
            }
        };

        if tx.send(received).await.is_err() || received == ControlSignal::Shutdown {
            return Ok(());
        }
    }
}

#[cfg(windows)]
async fn forward_signals(tx: &mpsc::Sender<ControlSignal>) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::config(format!("Failed to listen for Ctrl+C: {}", e)))?;
    info!("Received Ctrl+C");
    let _ = tx.send(ControlSignal::Shutdown).await;
    Ok(())
}
