//! Bridge -> plugins -> webhooks, end to end through the orchestrator

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use stend_app::{PluginFactories, PluginUnit};
use stend_core::{BridgeState, ChatMessage, EventCategory, Result, SystemEvent};
use stend_daemon::test_utils::FakeTransport;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use wiremock::matchers::{body_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::{build, fast_settings, project_dir, wait_until, write_plugin};

/// Counts system events; fails every call when `fail` is set
#[derive(Debug)]
struct CountingUnit {
    name: String,
    system_events: Arc<AtomicUsize>,
    kinds: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait::async_trait]
impl PluginUnit for CountingUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, _category: EventCategory) -> bool {
        true
    }

    async fn on_message(&self, _message: &ChatMessage) -> Result<()> {
        Ok(())
    }

    async fn on_system_event(&self, event: &SystemEvent) -> Result<()> {
        self.system_events.fetch_add(1, Ordering::SeqCst);
        self.kinds.lock().unwrap().push(format!("{}:{}", self.name, event.kind));
        if self.fail {
            return Err(stend_core::Error::plugin(&self.name, "refuses every event"));
        }
        Ok(())
    }
}

fn counting_factories(
    system_events: &Arc<AtomicUsize>,
    kinds: &Arc<Mutex<Vec<String>>>,
) -> PluginFactories {
    let mut factories = PluginFactories::builtin();
    let (events, kinds) = (Arc::clone(system_events), Arc::clone(kinds));
    factories.register("counting", move |name, manifest, _ctx| {
        let fail = manifest
            .config
            .get("fail")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(Arc::new(CountingUnit {
            name: name.to_string(),
            system_events: Arc::clone(&events),
            kinds: Arc::clone(&kinds),
            fail,
        }) as Arc<dyn PluginUnit>)
    });
    factories
}

/// Accept one websocket client, send `frames`, keep the socket open
async fn serve_frames(frames: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for frame in frames {
            ws.send(WsMessage::text(frame)).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });
    format!("ws://{addr}/ws")
}

#[tokio::test]
async fn test_system_event_reaches_every_unit_and_webhook_once() {
    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({
            "event": "NICKNAME_CHANGE",
            "data": {"type": "stend_event", "event": "NICKNAME_CHANGE", "target_id": 7},
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hooks)
        .await;

    let url = serve_frames(vec![
        r#"{"type":"stend_event","event":"NICKNAME_CHANGE","target_id":7}"#.to_string(),
    ])
    .await;

    let dir = project_dir();
    write_plugin(dir.path(), "first", "kind = \"counting\"\n");
    write_plugin(dir.path(), "second", "kind = \"counting\"\n[config]\nfail = true\n");
    write_plugin(dir.path(), "third", "kind = \"counting\"\n");

    let mut settings = fast_settings();
    settings.bridge.url = url;
    settings.webhooks.urls = vec![hooks.uri()];

    let system_events = Arc::new(AtomicUsize::new(0));
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(FakeTransport::ready());
    let orch = build(
        &transport,
        settings,
        dir.path(),
        counting_factories(&system_events, &kinds),
    );

    orch.start().await.unwrap();
    wait_until(|| system_events.load(Ordering::SeqCst) == 3).await;
    assert_eq!(orch.status().bridge, BridgeState::Connected);

    for _ in 0..500 {
        if !hooks.received_requests().await.unwrap_or_default().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(
        *kinds.lock().unwrap(),
        vec![
            "first:NICKNAME_CHANGE",
            "second:NICKNAME_CHANGE",
            "third:NICKNAME_CHANGE",
        ]
    );
    assert_eq!(hooks.received_requests().await.unwrap().len(), 1);

    orch.stop().await;
    assert_eq!(orch.status().bridge, BridgeState::Disconnected);
}

#[tokio::test]
async fn test_message_webhook_carries_frame_as_received() {
    let frame = json!({
        "msg": "hello",
        "room": "General",
        "sender": "alice",
        "json": {"chat_id": 42, "user_id": 7},
    });
    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({"event": "message", "data": frame.clone()})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hooks)
        .await;

    let url = serve_frames(vec![frame.to_string()]).await;
    let dir = project_dir();
    let mut settings = fast_settings();
    settings.bridge.url = url;
    settings.webhooks.urls = vec![hooks.uri()];

    let transport = Arc::new(FakeTransport::ready());
    let orch = build(&transport, settings, dir.path(), PluginFactories::builtin());
    orch.start().await.unwrap();

    for _ in 0..500 {
        if !hooks.received_requests().await.unwrap_or_default().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(hooks.received_requests().await.unwrap().len(), 1);

    orch.stop().await;
}

#[tokio::test]
async fn test_failing_unit_does_not_starve_others_across_frames() {
    let frames = (0..4)
        .map(|i| format!(r#"{{"type":"stend_event","event":"MESSAGE_DELETE","log_id":{i}}}"#))
        .collect();
    let url = serve_frames(frames).await;

    let dir = project_dir();
    write_plugin(dir.path(), "a_bad", "kind = \"counting\"\n[config]\nfail = true\n");
    write_plugin(dir.path(), "b_good", "kind = \"state\"\n");

    let mut settings = fast_settings();
    settings.bridge.url = url;

    let system_events = Arc::new(AtomicUsize::new(0));
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(FakeTransport::ready());
    let orch = build(
        &transport,
        settings,
        dir.path(),
        counting_factories(&system_events, &kinds),
    );

    orch.start().await.unwrap();
    wait_until(|| {
        orch.shared()
            .get("last_event:MESSAGE_DELETE")
            .is_some_and(|v| v["log_id"] == 3)
    })
    .await;
    assert_eq!(system_events.load(Ordering::SeqCst), 4);

    orch.stop().await;
}

#[tokio::test]
async fn test_responder_replies_through_subsystem() {
    let subsystem = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({
            "type": "text",
            "room": 42,
            "data": "Stend Platform Pong!",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&subsystem)
        .await;

    let url = serve_frames(vec![
        r#"{"msg":"/ping","room":"General","sender":"alice","json":{"chat_id":42,"user_id":7}}"#
            .to_string(),
    ])
    .await;

    let dir = project_dir();
    write_plugin(
        dir.path(),
        "pong",
        "kind = \"responder\"\n[[config.rules]]\ntrigger = \"/ping\"\nreply = \"Stend Platform Pong!\"\n",
    );

    let mut settings = fast_settings();
    settings.bridge.url = url;
    settings.subsystem.api_url = subsystem.uri();

    let transport = Arc::new(FakeTransport::ready());
    let orch = build(&transport, settings, dir.path(), PluginFactories::builtin());
    orch.start().await.unwrap();

    for _ in 0..500 {
        if !subsystem.received_requests().await.unwrap_or_default().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(subsystem.received_requests().await.unwrap().len(), 1);

    orch.stop().await;
}
