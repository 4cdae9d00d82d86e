//! Persistent WebSocket bridge to the subsystem's event endpoint.
//!
//! The [`EventBridge`] owns a background task that connects, receives JSON
//! frames, hands each one to a single [`FrameHandler`], and reconnects after
//! a fixed delay whenever the connection fails or closes. It never gives up
//! on its own; only [`EventBridge::stop`] ends the loop.
//!
//! ```text
//!   start() ──▶ Connecting ──ok──▶ Connected ──close/error──┐
//!                  ▲   │                                     │
//!                  │   └──err──┐                             │
//!                  └── sleep(reconnect_delay) ◀──────────────┘
//!
//!   stop() from any state ──▶ Stopped
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use stend_core::prelude::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Default delay between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How long `stop()` waits for the loop to wind down before aborting it
const STOP_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Connection state of an [`EventBridge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeConnection {
    /// Not running; initial and terminal state
    Stopped,
    /// Opening a connection or waiting out the reconnect delay
    Connecting,
    /// Receiving frames
    Connected,
}

/// Receiver of parsed frames
///
/// Frames are delivered one at a time in arrival order; the bridge awaits
/// each call before reading the next frame.
#[trait_variant::make(FrameHandler: Send)]
pub trait LocalFrameHandler {
    async fn handle_frame(&self, frame: Value);

    /// Called on every connection state change
    ///
    /// Runs while the bridge's state channel is locked, so it must not call
    /// back into the [`EventBridge`].
    fn on_connection_change(&self, _state: BridgeConnection) {}
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub url: String,
    pub reconnect_delay: Duration,
}

impl BridgeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// EventBridge
// ---------------------------------------------------------------------------

/// Persistent streaming client with fixed-delay reconnect
pub struct EventBridge {
    config: BridgeConfig,
    state_tx: Arc<watch::Sender<BridgeConnection>>,
    attempts: Arc<AtomicU64>,
    /// Bumped whenever a loop is replaced or stopped; only the loop holding
    /// the current value may publish state
    generation: Arc<AtomicU64>,
    running: Mutex<Option<RunningLoop>>,
}

impl EventBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (state_tx, _) = watch::channel(BridgeConnection::Stopped);
        Self {
            config,
            state_tx: Arc::new(state_tx),
            attempts: Arc::new(AtomicU64::new(0)),
            generation: Arc::new(AtomicU64::new(0)),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Spawn the connection loop and return immediately
    ///
    /// A loop that is already running is signalled to stop and replaced.
    /// The replaced loop can no longer publish state, so a late `Stopped`
    /// from it never overwrites the new loop's state.
    pub fn start<H>(&self, handler: Arc<H>)
    where
        H: FrameHandler + Sync + 'static,
    {
        let generation = self.retire_loops(None);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_bridge_loop(
            self.config.clone(),
            handler,
            stop_rx,
            LoopState {
                state_tx: Arc::clone(&self.state_tx),
                generation: Arc::clone(&self.generation),
                current: generation,
            },
            Arc::clone(&self.attempts),
        ));

        let previous = self
            .lock_running()
            .replace(RunningLoop { stop_tx, handle });
        if let Some(old) = previous {
            debug!("EventBridge: replacing running loop");
            let _ = old.stop_tx.send(true);
        }
        info!("EventBridge: started for {}", self.config.url);
    }

    /// Stop the loop and close the connection; safe to call repeatedly
    pub async fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };
        let _ = running.stop_tx.send(true);

        let mut handle = running.handle;
        if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
            warn!("EventBridge: loop did not stop in {:?}, aborting", STOP_GRACE);
            handle.abort();
        }
        self.retire_loops(Some(BridgeConnection::Stopped));
        info!("EventBridge: stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn state(&self) -> BridgeConnection {
        *self.state_tx.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe(&self) -> watch::Receiver<BridgeConnection> {
        self.state_tx.subscribe()
    }

    /// Total connection attempts since creation
    pub fn connection_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Invalidate every existing loop's right to publish state, optionally
    /// publishing `state`; returns the new generation
    fn retire_loops(&self, state: Option<BridgeConnection>) -> u64 {
        let mut next = 0;
        self.state_tx.send_if_modified(|current| {
            next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            match state {
                Some(state) => {
                    *current = state;
                    true
                }
                None => false,
            }
        });
        next
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        if let Some(running) = self.lock_running().take() {
            let _ = running.stop_tx.send(true);
        }
    }
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

/// A loop's handle on the shared state channel
struct LoopState {
    state_tx: Arc<watch::Sender<BridgeConnection>>,
    generation: Arc<AtomicU64>,
    current: u64,
}

async fn run_bridge_loop<H>(
    config: BridgeConfig,
    handler: Arc<H>,
    mut stop_rx: watch::Receiver<bool>,
    loop_state: LoopState,
    attempts: Arc<AtomicU64>,
) where
    H: FrameHandler + Sync + 'static,
{
    // The generation check and the publish happen under the channel lock
    let set_state = |state: BridgeConnection| {
        loop_state.state_tx.send_if_modified(|current| {
            if loop_state.generation.load(Ordering::SeqCst) != loop_state.current {
                return false;
            }
            *current = state;
            handler.on_connection_change(state);
            true
        });
    };

    loop {
        if *stop_rx.borrow() {
            break;
        }

        set_state(BridgeConnection::Connecting);
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let connected = tokio::select! {
            result = connect_ws(&config.url) => result,
            _ = wait_for_stop(&mut stop_rx) => break,
        };

        match connected {
            Ok(ws_stream) => {
                info!("EventBridge: connected to {} (attempt {})", config.url, attempt);
                set_state(BridgeConnection::Connected);

                let stopped = run_io_loop(ws_stream, handler.as_ref(), &mut stop_rx).await;
                if stopped {
                    break;
                }
                set_state(BridgeConnection::Connecting);
            }
            Err(err) => {
                warn!("EventBridge: connection attempt {} failed: {}", attempt, err);
            }
        }

        debug!("EventBridge: reconnecting in {:?}", config.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = wait_for_stop(&mut stop_rx) => break,
        }
    }

    set_state(BridgeConnection::Stopped);
    debug!("EventBridge: loop exiting");
}

/// Receive frames until the connection ends.
///
/// Returns `true` when stopped explicitly, `false` when the connection was
/// lost and the caller should reconnect.
async fn run_io_loop<H>(ws_stream: WsStream, handler: &H, stop_rx: &mut watch::Receiver<bool>) -> bool
where
    H: FrameHandler + Sync,
{
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        deliver(handler, text.as_str()).await;
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => deliver(handler, text).await,
                        Err(_) => warn!("EventBridge: dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("EventBridge: remote closed the connection");
                        return false;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Frame
                    }
                    Some(Err(err)) => {
                        warn!("EventBridge: read error: {}", err);
                        return false;
                    }
                    None => {
                        debug!("EventBridge: stream ended");
                        return false;
                    }
                }
            }

            _ = wait_for_stop(stop_rx) => {
                if let Err(err) = ws_sink.send(WsMessage::Close(None)).await {
                    debug!("EventBridge: close frame not sent: {}", err);
                }
                let _ = ws_sink.close().await;
                return true;
            }
        }
    }
}

/// Parse one frame and hand it to the handler, containing any panic
async fn deliver<H>(handler: &H, text: &str)
where
    H: FrameHandler + Sync,
{
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            warn!("EventBridge: dropping unparseable frame: {}", err);
            return;
        }
    };

    if AssertUnwindSafe(handler.handle_frame(frame))
        .catch_unwind()
        .await
        .is_err()
    {
        error!("EventBridge: frame handler panicked, continuing");
    }
}

/// Resolves once a stop has been requested or the bridge was dropped
async fn wait_for_stop(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn connect_ws(url: &str) -> Result<WsStream> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|err| Error::bridge(format!("Failed to connect to {url}: {err}")))?;
    Ok(ws_stream)
}
