//! Persistent store through the orchestrator

use std::sync::Arc;

use serde_json::json;
use stend_app::{Orchestrator, PersistentStore, PluginFactories};
use stend_daemon::test_utils::FakeTransport;

use crate::{fast_settings, project_dir};

#[tokio::test]
async fn test_structured_value_round_trip() {
    let dir = project_dir();
    let orch = Orchestrator::new(Arc::new(FakeTransport::ready()), fast_settings(), dir.path())
        .unwrap();

    orch.store().put("admins", &json!([1, 2])).unwrap();
    assert_eq!(orch.store().get("admins").unwrap(), Some(json!([1, 2])));
    assert!(dir.path().join("stend_store.db").exists());
}

#[tokio::test]
async fn test_store_survives_orchestrator_restart() {
    let dir = project_dir();
    let db = dir.path().join("stend_store.db");
    {
        let orch = Orchestrator::with_parts(
            Arc::new(FakeTransport::ready()),
            fast_settings(),
            dir.path(),
            PluginFactories::builtin(),
            PersistentStore::open(&db).unwrap(),
        )
        .unwrap();
        orch.store().put("greeting", &json!("hello")).unwrap();
    }

    let orch = Orchestrator::new(Arc::new(FakeTransport::ready()), fast_settings(), dir.path())
        .unwrap();
    assert_eq!(orch.store().get("greeting").unwrap(), Some(json!("hello")));
    assert_eq!(orch.store().list_keys().unwrap(), vec!["greeting"]);
}
