//! Startup stages: probe timeout, partial plugin load, forwarding, state order

use std::sync::{Arc, Mutex};
use std::time::Duration;

use stend_app::PluginFactories;
use stend_core::{BridgeState, DeviceState, Error, StartupFailure};
use stend_daemon::test_utils::FakeTransport;
use stend_daemon::DeviceCommand;

use crate::{build, fast_settings, project_dir, write_plugin};

#[tokio::test(start_paused = true)]
async fn test_probe_timeout_leaves_plugins_untouched() {
    let dir = project_dir();
    write_plugin(dir.path(), "state", "kind = \"state\"\n");
    let transport = Arc::new(FakeTransport::never_ready());
    let orch = build(&transport, fast_settings(), dir.path(), PluginFactories::builtin());

    assert_eq!(orch.reload_plugins().await, vec!["state"]);

    let started = tokio::time::Instant::now();
    let err = orch.start().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::DeviceUnavailable { .. }));
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));

    let status = orch.status();
    assert_eq!(status.device, DeviceState::Error);
    assert_eq!(status.bridge, BridgeState::Disconnected);
    assert_eq!(status.plugin_count, 1);
    assert_eq!(
        status.last_failure,
        Some(StartupFailure::ProbeTimeout { timeout_ms: 2000 })
    );
    assert_eq!(transport.count("push"), 0);
}

#[tokio::test]
async fn test_partial_plugin_load() {
    let dir = project_dir();
    write_plugin(dir.path(), "alpha", "kind = \"state\"\n");
    write_plugin(
        dir.path(),
        "beta",
        "kind = \"responder\"\n[[config.rules]]\ntrigger = \"/ping\"\nreply = \"Stend Platform Pong!\"\n",
    );
    write_plugin(dir.path(), "broken", "kind = \"responder\"\n[[config.rules]]\nreply = 3\n");

    let transport = Arc::new(FakeTransport::ready());
    let orch = build(&transport, fast_settings(), dir.path(), PluginFactories::builtin());

    let report = orch.start().await.unwrap();
    assert_eq!(report.plugins, vec!["alpha", "beta"]);
    assert_eq!(orch.reload_plugins().await, vec!["alpha", "beta"]);
    assert_eq!(orch.status().plugin_count, 2);

    orch.stop().await;
}

#[tokio::test]
async fn test_restart_keeps_single_forward() {
    let dir = project_dir();
    let transport = Arc::new(FakeTransport::ready());
    let orch = build(&transport, fast_settings(), dir.path(), PluginFactories::builtin());

    orch.start().await.unwrap();
    assert_eq!(transport.count("forward"), 1);
    orch.start().await.unwrap();
    assert_eq!(transport.count("forward"), 2);

    let issued: Vec<DeviceCommand> = transport
        .commands()
        .into_iter()
        .filter(|c| matches!(c, DeviceCommand::Forward { .. }))
        .collect();
    assert_eq!(issued[0], issued[1]);
    assert_eq!(
        issued[0],
        DeviceCommand::Forward {
            local: 3000,
            remote: 3000
        }
    );
    assert_eq!(transport.forwards(), vec![(3000, 3000)]);
    assert_eq!(transport.count("push"), 2);

    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_wedged_connect_counts_against_probe_timeout() {
    let dir = project_dir();
    let transport = Arc::new(
        FakeTransport::never_ready().with_delay("connect", Duration::from_secs(120)),
    );
    let orch = build(&transport, fast_settings(), dir.path(), PluginFactories::builtin());

    let started = tokio::time::Instant::now();
    let err = orch.start().await.unwrap_err();

    assert!(matches!(err, Error::DeviceUnavailable { .. }));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(
        orch.status().last_failure,
        Some(StartupFailure::ProbeTimeout { timeout_ms: 2000 })
    );
}

#[tokio::test]
async fn test_stop_during_startup_leaves_bridge_down() {
    let dir = project_dir();
    let transport = Arc::new(FakeTransport::ready().ready_after(5));
    let orch = build(&transport, fast_settings(), dir.path(), PluginFactories::builtin());

    let starting = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start().await })
    };

    // Still probing when the stop request arrives
    tokio::time::sleep(Duration::from_millis(50)).await;
    orch.stop().await;

    assert!(!orch.bridge().is_running());
    assert_eq!(orch.status().bridge, BridgeState::Disconnected);
    assert!(starting.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_device_never_connected_before_probe_succeeds() {
    let dir = project_dir();
    let transport = Arc::new(FakeTransport::ready().ready_after(3));
    let mut settings = fast_settings();
    settings.device.probe_interval_ms = 30;
    let orch = build(&transport, settings, dir.path(), PluginFactories::builtin());

    let observed = Arc::new(Mutex::new(Vec::new()));
    let watcher = {
        let orch = orch.clone();
        let observed = Arc::clone(&observed);
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            loop {
                let device = orch.status().device;
                let ready_probes = transport.count("get-state") > 3;
                observed.lock().unwrap().push((device, ready_probes));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    orch.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    watcher.abort();

    let observed = observed.lock().unwrap();
    for (device, probe_succeeded) in observed.iter() {
        if *device == DeviceState::Connected {
            assert!(probe_succeeded, "connected before a successful probe");
        }
        assert_ne!(*device, DeviceState::Error);
    }
    assert_eq!(observed.last().map(|(d, _)| *d), Some(DeviceState::Connected));

    orch.stop().await;
}

#[tokio::test]
async fn test_pid_lookup_exhaustion_fails_deploy_stage() {
    let dir = project_dir();
    let transport = Arc::new(FakeTransport::ready().with_pid(None));
    let orch = build(&transport, fast_settings(), dir.path(), PluginFactories::builtin());

    let err = orch.start().await.unwrap_err();
    assert!(matches!(err, Error::ProcessNotFound { attempts: 3, .. }));
    assert_eq!(transport.count("pidof"), 3);

    let status = orch.status();
    assert_eq!(status.device, DeviceState::Error);
    assert_eq!(status.last_failure.as_ref().map(|f| f.stage()), Some("deploy"));
    assert_eq!(status.plugin_count, 0);
    assert!(!orch.bridge().is_running());
}
