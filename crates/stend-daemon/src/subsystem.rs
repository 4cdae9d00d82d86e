//! HTTP client for the subsystem's own REST surface
//!
//! The subsystem listens on the forwarded port; plugins use [`SubsystemClient`]
//! to reply into rooms and the control surface proxies read calls through it.

use std::time::Duration;

use serde_json::{json, Value};
use stend_core::prelude::*;
use url::Url;

/// Default per-request timeout for subsystem calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SubsystemClient {
    http: reqwest::Client,
    base: Url,
}

impl SubsystemClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::config_invalid(format!("subsystem base URL '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::subsystem(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Send a text reply into a room
    pub async fn reply(&self, room: &str, text: &str) -> Result<()> {
        let body = json!({
            "type": "text",
            "room": room_id_value(room),
            "data": text,
        });
        self.post("/reply", &body).await?;
        debug!("Replied to room {}", room);
        Ok(())
    }

    /// GET a path relative to the base URL and return its JSON body
    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path)?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::subsystem(format!("GET {url}: {e}")))?;
        read_json(response).await
    }

    /// POST a JSON body to a path relative to the base URL
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path)?;
        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| Error::subsystem(format!("POST {url}: {e}")))?;
        read_json(response).await
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::subsystem(format!("invalid path '{path}': {e}")))
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| Error::subsystem(format!("reading response body: {e}")))?;

    if !status.is_success() {
        return Err(Error::subsystem(format!("HTTP {status}: {text}")));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    // Some endpoints answer with plain text
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// Room ids are numeric on the wire when they look numeric
fn room_id_value(room: &str) -> Value {
    room.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(room.to_string()))
}
