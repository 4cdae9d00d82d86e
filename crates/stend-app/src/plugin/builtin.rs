//! Built-in plugin kinds
//!
//! - `responder`: replies to chat messages matching trigger rules
//! - `command`: pipes each event as JSON into an external program
//! - `state`: records the latest message per room and event per kind

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use stend_core::prelude::*;
use stend_core::{ChatMessage, Event, EventCategory, SystemEvent};
use stend_daemon::SubsystemClient;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::loader::{PluginContext, PluginManifest};
use super::PluginUnit;
use crate::shared_state::SharedState;

// ─────────────────────────────────────────────────────────
// responder
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Exact,
    Prefix,
}

/// One trigger -> reply rule
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyRule {
    pub trigger: String,
    /// Reply text; `{sender}` and `{room}` are substituted
    pub reply: String,
    #[serde(default, rename = "match")]
    pub mode: MatchMode,
}

impl ReplyRule {
    fn matches(&self, content: &str) -> bool {
        let content = content.trim();
        match self.mode {
            MatchMode::Exact => content == self.trigger,
            MatchMode::Prefix => content.starts_with(&self.trigger),
        }
    }

    fn render(&self, message: &ChatMessage) -> String {
        self.reply
            .replace("{sender}", message.sender.name.as_deref().unwrap_or(""))
            .replace("{room}", message.room.name.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Deserialize)]
struct ResponderConfig {
    #[serde(default)]
    rules: Vec<ReplyRule>,
}

/// Replies into the originating room when a rule matches
///
/// Only the first matching rule fires.
#[derive(Debug)]
pub struct Responder {
    name: String,
    rules: Vec<ReplyRule>,
    client: SubsystemClient,
}

impl Responder {
    pub fn new(name: impl Into<String>, rules: Vec<ReplyRule>, client: SubsystemClient) -> Self {
        Self {
            name: name.into(),
            rules,
            client,
        }
    }

    pub fn from_manifest(name: &str, manifest: &PluginManifest, ctx: &PluginContext) -> Result<Self> {
        let config: ResponderConfig = manifest.config_as(name)?;
        if config.rules.is_empty() {
            warn!("Responder {} has no rules", name);
        }
        Ok(Self::new(name, config.rules, ctx.subsystem.clone()))
    }
}

#[async_trait]
impl PluginUnit for Responder {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, category: EventCategory) -> bool {
        category == EventCategory::Message
    }

    async fn on_message(&self, message: &ChatMessage) -> Result<()> {
        let Some(rule) = self.rules.iter().find(|r| r.matches(&message.content)) else {
            return Ok(());
        };
        let Some(room) = message.room.id.as_deref() else {
            return Err(Error::plugin(&self.name, "message has no room id to reply to"));
        };
        self.client
            .reply(room, &rule.render(message))
            .await
            .map_err(|e| Error::plugin(&self.name, e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────
// command
// ─────────────────────────────────────────────────────────

fn default_categories() -> Vec<String> {
    vec!["message".to_string(), "system_event".to_string()]
}

#[derive(Debug, Deserialize)]
struct CommandConfig {
    program: PathBuf,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default = "default_categories")]
    categories: Vec<String>,
    timeout_ms: Option<u64>,
}

/// Runs an external program once per event, event JSON on stdin
///
/// A non-zero exit status counts as a handler failure.
#[derive(Debug)]
pub struct CommandPlugin {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    categories: Vec<EventCategory>,
    timeout: Option<Duration>,
}

impl CommandPlugin {
    pub fn from_manifest(name: &str, manifest: &PluginManifest) -> Result<Self> {
        let config: CommandConfig = manifest.config_as(name)?;

        let mut categories = Vec::new();
        for raw in &config.categories {
            let category = EventCategory::parse(raw)
                .ok_or_else(|| Error::plugin(name, format!("unknown category '{raw}'")))?;
            if !categories.contains(&category) {
                categories.push(category);
            }
        }

        Ok(Self {
            name: name.to_string(),
            program: config.program,
            args: config.args,
            categories,
            timeout: config.timeout_ms.map(Duration::from_millis),
        })
    }

    async fn run(&self, payload: Value) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::plugin(&self.name, format!("spawn {}: {e}", self.program.display()))
            })?;

        // Written alongside the wait so a chatty stderr cannot stall the child
        if let Some(mut stdin) = child.stdin.take() {
            let mut input = serde_json::to_vec(&payload)?;
            input.push(b'\n');
            let name = self.name.clone();
            tokio::spawn(async move {
                // Programs that ignore stdin may close it early
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("{}: stdin write failed: {}", name, e);
                }
            });
        }

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| Error::plugin(&self.name, format!("timed out after {limit:?}")))??,
            None => wait.await?,
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::plugin(
            &self.name,
            format!("{} exited with {}: {}", self.program.display(), output.status, stderr.trim()),
        ))
    }
}

#[async_trait]
impl PluginUnit for CommandPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, category: EventCategory) -> bool {
        self.categories.contains(&category)
    }

    async fn on_message(&self, message: &ChatMessage) -> Result<()> {
        self.run(Event::Message(message.clone()).to_json()).await
    }

    async fn on_system_event(&self, event: &SystemEvent) -> Result<()> {
        self.run(Event::SystemEvent(event.clone()).to_json()).await
    }
}

// ─────────────────────────────────────────────────────────
// state
// ─────────────────────────────────────────────────────────

/// Keeps `last_message:<room>` and `last_event:<kind>` in shared state
#[derive(Debug)]
pub struct StateRecorder {
    name: String,
    shared: SharedState,
}

impl StateRecorder {
    pub fn new(name: impl Into<String>, shared: SharedState) -> Self {
        Self {
            name: name.into(),
            shared,
        }
    }

    pub fn from_manifest(name: &str, _manifest: &PluginManifest, ctx: &PluginContext) -> Result<Self> {
        Ok(Self::new(name, ctx.shared.clone()))
    }
}

#[async_trait]
impl PluginUnit for StateRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, _category: EventCategory) -> bool {
        true
    }

    async fn on_message(&self, message: &ChatMessage) -> Result<()> {
        let room = message.room.id.as_deref().unwrap_or("unknown");
        self.shared.set(
            format!("last_message:{room}"),
            json!({
                "content": message.content,
                "sender": message.sender,
            }),
        );
        Ok(())
    }

    async fn on_system_event(&self, event: &SystemEvent) -> Result<()> {
        self.shared
            .set(format!("last_event:{}", event.kind), Value::Object(event.fields.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::loader::tests::test_context;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manifest(text: &str) -> PluginManifest {
        toml::from_str(text).unwrap()
    }

    fn chat(frame: &str) -> ChatMessage {
        match Event::from_frame(frame).unwrap() {
            Event::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_rule_matching() {
        let exact = ReplyRule {
            trigger: "/ping".into(),
            reply: "pong".into(),
            mode: MatchMode::Exact,
        };
        assert!(exact.matches("/ping"));
        assert!(exact.matches("  /ping "));
        assert!(!exact.matches("/ping now"));

        let prefix = ReplyRule {
            mode: MatchMode::Prefix,
            ..exact
        };
        assert!(prefix.matches("/ping now"));
    }

    #[tokio::test]
    async fn test_responder_replies_to_room() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reply"))
            .and(body_json(json!({
                "type": "text",
                "room": 42,
                "data": "Stend Platform Pong! (alice)",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let m = manifest(
            r#"
            kind = "responder"
            [[config.rules]]
            trigger = "/ping"
            reply = "Stend Platform Pong! ({sender})"
            "#,
        );
        let mut ctx = test_context();
        ctx.subsystem = SubsystemClient::new(&server.uri()).unwrap();
        let unit = Responder::from_manifest("pong", &m, &ctx).unwrap();

        assert!(unit.handles(EventCategory::Message));
        assert!(!unit.handles(EventCategory::SystemEvent));

        unit.on_message(&chat(r#"{"msg":"/ping","sender":"alice","chat_id":42}"#))
            .await
            .unwrap();
        unit.on_message(&chat(r#"{"msg":"hello","sender":"alice","chat_id":42}"#))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_responder_reply_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let unit = Responder::new(
            "pong",
            vec![ReplyRule {
                trigger: "/ping".into(),
                reply: "pong".into(),
                mode: MatchMode::Exact,
            }],
            SubsystemClient::new(&server.uri()).unwrap(),
        );
        let err = unit
            .on_message(&chat(r#"{"msg":"/ping","chat_id":1}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Plugin { .. }));
    }

    #[test]
    fn test_command_rejects_unknown_category() {
        let m = manifest(
            r#"
            kind = "command"
            [config]
            program = "cat"
            categories = ["bogus"]
            "#,
        );
        assert!(CommandPlugin::from_manifest("c", &m).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_receives_event_json() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("event.json");
        let m = manifest(&format!(
            r#"
            kind = "command"
            [config]
            program = "sh"
            args = ["-c", "cat > '{}'"]
            categories = ["system_event"]
            "#,
            out.display()
        ));
        let unit = CommandPlugin::from_manifest("archive", &m).unwrap();
        assert!(!unit.handles(EventCategory::Message));

        let Event::SystemEvent(ev) =
            Event::from_frame(r#"{"type":"stend_event","event":"NICKNAME_CHANGE","target_id":7}"#)
                .unwrap()
        else {
            panic!("expected system event");
        };
        unit.on_system_event(&ev).await.unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["event"], "NICKNAME_CHANGE");
        assert_eq!(written["data"]["target_id"], 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_nonzero_exit_is_error() {
        let m = manifest(
            r#"
            kind = "command"
            [config]
            program = "sh"
            args = ["-c", "echo boom >&2; exit 3"]
            "#,
        );
        let unit = CommandPlugin::from_manifest("fails", &m).unwrap();
        let err = unit
            .on_message(&chat(r#"{"msg":"hi","chat_id":1}"#))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_large_input_with_chatty_stderr() {
        let m = manifest(
            r#"
            kind = "command"
            [config]
            program = "sh"
            args = ["-c", "head -c 200000 /dev/zero >&2; cat > /dev/null"]
            timeout_ms = 10000
            "#,
        );
        let unit = CommandPlugin::from_manifest("chatty", &m).unwrap();
        let frame = serde_json::json!({"msg": "x".repeat(200_000), "chat_id": 1}).to_string();
        unit.on_message(&chat(&frame)).await.unwrap();
    }

    #[tokio::test]
    async fn test_state_recorder_writes_shared_state() {
        let ctx = test_context();
        let unit = StateRecorder::from_manifest("state", &manifest("kind = \"state\""), &ctx).unwrap();

        unit.on_message(&chat(r#"{"msg":"hi","sender":"bob","chat_id":9}"#))
            .await
            .unwrap();
        let Event::SystemEvent(ev) =
            Event::from_frame(r#"{"type":"stend_event","event":"MESSAGE_DELETE","log_id":3}"#)
                .unwrap()
        else {
            panic!("expected system event");
        };
        unit.on_system_event(&ev).await.unwrap();

        assert_eq!(ctx.shared.get("last_message:9").unwrap()["content"], "hi");
        assert_eq!(ctx.shared.get("last_event:MESSAGE_DELETE"), Some(json!({"log_id": 3})));
    }
}
