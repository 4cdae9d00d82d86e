//! Inbound event model
//!
//! Every frame received from the subsystem's event endpoint is a UTF-8 JSON
//! object. [`Event::from_frame`] categorizes it into one of the variants
//! below; events are immutable once built.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Value of the `type` field that marks a system event frame
pub const SYSTEM_EVENT_TYPE: &str = "stend_event";

/// Webhook event name used when message frames are forwarded
pub const MESSAGE_WEBHOOK_EVENT: &str = "message";

// ─────────────────────────────────────────────────────────
// Categories
// ─────────────────────────────────────────────────────────

/// Event categories routed to plugin handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Message,
    SystemEvent,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Message => "message",
            EventCategory::SystemEvent => "system_event",
        }
    }

    /// Parse a category name as written in plugin manifests
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "message" | "on_message" => Some(EventCategory::Message),
            "system_event" | "on_system_event" | "stend_event" => Some(EventCategory::SystemEvent),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Event Structs
// ─────────────────────────────────────────────────────────

/// Identifier + display name pair used for rooms and senders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Participant {
    /// Stringified numeric or string id; `None` when the frame omits it
    pub id: Option<String>,
    pub name: Option<String>,
}

/// Chat-style message frame, normalized
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub content: String,
    pub room: Participant,
    pub sender: Participant,
    /// The frame exactly as received
    pub raw: Value,
}

/// Named system notification (rename, delete, visibility change, ...)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemEvent {
    /// Sub-kind, e.g. `NICKNAME_CHANGE`
    pub kind: String,
    /// Every field of the frame other than `type` and `event`
    pub fields: Map<String, Value>,
    pub raw: Value,
}

impl SystemEvent {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(ChatMessage),
    SystemEvent(SystemEvent),
    /// Valid JSON object that matches no known shape
    Other(Value),
}

impl Event {
    /// Parse and categorize a raw text frame
    ///
    /// A frame carrying `msg` is a message even if it also has a `type`.
    /// Non-object JSON is rejected.
    pub fn from_frame(text: &str) -> Result<Event> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Event> {
        let Some(obj) = value.as_object() else {
            return Err(Error::protocol(format!(
                "expected JSON object frame, got {}",
                json_kind(&value)
            )));
        };

        if let Some(msg) = obj.get("msg") {
            return Ok(Event::Message(parse_message(obj, msg, &value)));
        }

        if obj.get("type").and_then(Value::as_str) == Some(SYSTEM_EVENT_TYPE) {
            if let Some(kind) = obj.get("event").and_then(Value::as_str) {
                let fields = obj
                    .iter()
                    .filter(|(k, _)| k.as_str() != "type" && k.as_str() != "event")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                return Ok(Event::SystemEvent(SystemEvent {
                    kind: kind.to_string(),
                    fields,
                    raw: value.clone(),
                }));
            }
        }

        Ok(Event::Other(value))
    }

    /// Category for plugin dispatch, `None` for unrecognized frames
    pub fn category(&self) -> Option<EventCategory> {
        match self {
            Event::Message(_) => Some(EventCategory::Message),
            Event::SystemEvent(_) => Some(EventCategory::SystemEvent),
            Event::Other(_) => None,
        }
    }

    /// Name used for webhook fan-out
    pub fn webhook_name(&self) -> Option<&str> {
        match self {
            Event::Message(_) => Some(MESSAGE_WEBHOOK_EVENT),
            Event::SystemEvent(ev) => Some(ev.kind.as_str()),
            Event::Other(_) => None,
        }
    }

    /// The original frame value
    pub fn raw(&self) -> &Value {
        match self {
            Event::Message(m) => &m.raw,
            Event::SystemEvent(s) => &s.raw,
            Event::Other(v) => v,
        }
    }

    /// Serialized form handed to external handlers
    pub fn to_json(&self) -> Value {
        match self {
            Event::Message(m) => serde_json::json!({
                "category": EventCategory::Message,
                "room": m.room,
                "sender": m.sender,
                "message": { "content": m.content },
                "raw": m.raw,
            }),
            Event::SystemEvent(s) => serde_json::json!({
                "category": EventCategory::SystemEvent,
                "event": s.kind,
                "data": s.fields,
                "raw": s.raw,
            }),
            Event::Other(v) => v.clone(),
        }
    }
}

fn parse_message(obj: &Map<String, Value>, msg: &Value, value: &Value) -> ChatMessage {
    let nested = obj.get("json").and_then(Value::as_object);
    let lookup = |key: &str| -> Option<String> {
        nested
            .and_then(|n| n.get(key))
            .or_else(|| obj.get(key))
            .and_then(id_string)
    };

    let content = match msg {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    ChatMessage {
        content,
        room: Participant {
            id: lookup("chat_id"),
            name: obj.get("room").and_then(Value::as_str).map(String::from),
        },
        sender: Participant {
            id: lookup("user_id"),
            name: obj.get("sender").and_then(Value::as_str).map(String::from),
        },
        raw: value.clone(),
    }
}

/// Ids arrive as numbers or strings depending on the frame source
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
