//! Webhook registry and best-effort fan-out
//!
//! [`WebhookRegistry::trigger`] snapshots the subscribed URLs and spawns one
//! delivery task per URL. A semaphore caps how many POSTs are in flight;
//! excess deliveries wait for a permit inside their own task, so the caller
//! never waits.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use stend_core::prelude::*;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::validate_webhook_url;

/// Handles for the deliveries started by one [`WebhookRegistry::trigger`]
///
/// Dropping it detaches the deliveries.
#[derive(Debug)]
pub struct FanOut {
    handles: Vec<JoinHandle<bool>>,
}

impl FanOut {
    /// Number of URLs in the snapshot
    pub fn targets(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every delivery and return how many succeeded
    pub async fn wait(self) -> usize {
        let mut delivered = 0;
        for handle in self.handles {
            if matches!(handle.await, Ok(true)) {
                delivered += 1;
            }
        }
        delivered
    }
}

#[derive(Debug, Clone)]
pub struct WebhookRegistry {
    urls: Arc<RwLock<Vec<String>>>,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl WebhookRegistry {
    pub fn new(timeout: Duration, max_concurrent: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build webhook HTTP client: {e}")))?;
        Ok(Self {
            urls: Arc::new(RwLock::new(Vec::new())),
            http,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    /// Register a URL; returns `false` if it was already registered
    pub fn subscribe(&self, url: &str) -> Result<bool> {
        validate_webhook_url(url)?;
        let mut urls = self.urls.write().unwrap_or_else(|e| e.into_inner());
        if urls.iter().any(|u| u == url) {
            return Ok(false);
        }
        urls.push(url.to_string());
        info!("Webhook subscribed: {}", url);
        Ok(true)
    }

    /// Remove a URL; returns whether it was registered
    pub fn unsubscribe(&self, url: &str) -> bool {
        let mut urls = self.urls.write().unwrap_or_else(|e| e.into_inner());
        let before = urls.len();
        urls.retain(|u| u != url);
        let removed = urls.len() != before;
        if removed {
            info!("Webhook unsubscribed: {}", url);
        }
        removed
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// POST `{event, data}` to every URL registered right now
    ///
    /// Returns as soon as the deliveries are spawned. Failures are logged
    /// per URL and never reported to the caller.
    pub fn trigger(&self, event: &str, data: &Value) -> FanOut {
        let snapshot = self.urls();
        if snapshot.is_empty() {
            return FanOut {
                handles: Vec::new(),
            };
        }

        let body = Arc::new(json!({ "event": event, "data": data }));
        debug!("Webhook fan-out '{}' to {} url(s)", event, snapshot.len());

        let handles = snapshot
            .into_iter()
            .map(|url| {
                let http = self.http.clone();
                let permits = Arc::clone(&self.permits);
                let body = Arc::clone(&body);
                let event = event.to_string();
                tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return false;
                    };
                    deliver(&http, &url, &event, &body).await
                })
            })
            .collect();

        FanOut { handles }
    }
}

async fn deliver(http: &reqwest::Client, url: &str, event: &str, body: &Value) -> bool {
    match http.post(url).json(body).send().await {
        Ok(resp) if resp.status().is_success() => {
            trace!("Webhook {} delivered to {}", event, url);
            true
        }
        Ok(resp) => {
            warn!(url = %url, event = %event, status = %resp.status(), "Webhook rejected");
            false
        }
        Err(e) => {
            warn!(url = %url, event = %event, error = %e, "Webhook delivery failed");
            false
        }
    }
}
