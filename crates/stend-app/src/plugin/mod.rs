//! Plugin dispatch engine.
//!
//! A [`PluginUnit`] is a named handler set reacting to inbound events. The
//! [`PluginEngine`] holds the loaded units in load order and routes each event
//! category to every unit that handles it. Handler failures, panics and
//! (optionally) timeouts are contained per unit: they are logged with the
//! unit's name and dispatch moves on to the next unit.
//!
//! # Registry Lifecycle
//!
//! 1. [`PluginEngine::load`] reads the plugin directory through the
//!    [`PluginLoader`] and replaces the whole registry
//! 2. [`PluginEngine::dispatch`] iterates a snapshot of the registry, so a
//!    concurrent reload never changes the set of units seen by one event
//! 3. Units dropped by a reload are released once the last in-flight
//!    dispatch holding the old snapshot finishes

pub mod builtin;
pub mod loader;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use stend_core::prelude::*;
use stend_core::{ChatMessage, Event, EventCategory, SystemEvent};

pub use loader::{PluginContext, PluginFactories, PluginFactory, PluginLoader, PluginManifest};

/// A loaded handler set
///
/// Units only receive the categories for which [`handles`](Self::handles)
/// returns `true`. Handler methods default to no-ops.
#[async_trait]
pub trait PluginUnit: Send + Sync + fmt::Debug {
    /// Unit name, unique within a registry (the manifest file stem)
    fn name(&self) -> &str;

    /// Whether this unit has a handler for `category`
    fn handles(&self, category: EventCategory) -> bool;

    async fn on_message(&self, _message: &ChatMessage) -> Result<()> {
        Ok(())
    }

    async fn on_system_event(&self, _event: &SystemEvent) -> Result<()> {
        Ok(())
    }
}

type Registry = Arc<[Arc<dyn PluginUnit>]>;

/// Outcome of one [`PluginEngine::dispatch`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Units whose handler completed successfully
    pub delivered: Vec<String>,
    /// Units whose handler failed, panicked or timed out
    pub failed: Vec<String>,
}

impl DispatchReport {
    pub fn invoked(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

pub struct PluginEngine {
    registry: RwLock<Registry>,
    loader: PluginLoader,
    handler_timeout: Option<Duration>,
}

impl PluginEngine {
    pub fn new(loader: PluginLoader) -> Self {
        Self {
            registry: RwLock::new(Arc::from(Vec::new())),
            loader,
            handler_timeout: None,
        }
    }

    /// Bound every handler call; unbounded when `None`
    pub fn with_handler_timeout(mut self, limit: Option<Duration>) -> Self {
        self.handler_timeout = limit;
        self
    }

    /// Load every unit in `dir` and replace the registry
    ///
    /// Units that fail to load are skipped. Returns the loaded names in
    /// registry order.
    pub async fn load(&self, dir: &Path) -> Vec<String> {
        let units = self.loader.load_dir(dir).await;
        self.replace(units)
    }

    /// Replace the registry with `units`, returning their names
    pub fn replace(&self, units: Vec<Arc<dyn PluginUnit>>) -> Vec<String> {
        let names: Vec<String> = units.iter().map(|u| u.name().to_string()).collect();
        let registry: Registry = Arc::from(units);
        *self.registry.write().unwrap_or_else(|e| e.into_inner()) = registry;
        info!("Plugin registry now holds {} unit(s): {:?}", names.len(), names);
        names
    }

    /// Current registry, in load order
    pub fn snapshot(&self) -> Registry {
        Arc::clone(&self.registry.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|u| u.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every unit handling `category`, in registry order
    pub async fn dispatch(&self, category: EventCategory, event: &Event) -> DispatchReport {
        let mut report = DispatchReport::default();

        let matches_category = matches!(
            (category, event),
            (EventCategory::Message, Event::Message(_))
                | (EventCategory::SystemEvent, Event::SystemEvent(_))
        );
        if !matches_category {
            debug!("No {} payload in event, skipping dispatch", category);
            return report;
        }

        for unit in self.snapshot().iter() {
            if !unit.handles(category) {
                continue;
            }
            let name = unit.name().to_string();
            match self.invoke(unit.as_ref(), event).await {
                Ok(()) => report.delivered.push(name),
                Err(reason) => {
                    warn!(unit = %name, category = %category, "Plugin handler failed: {}", reason);
                    report.failed.push(name);
                }
            }
        }

        report
    }

    async fn invoke(&self, unit: &dyn PluginUnit, event: &Event) -> std::result::Result<(), String> {
        let call = async {
            match event {
                Event::Message(msg) => unit.on_message(msg).await,
                Event::SystemEvent(sys) => unit.on_system_event(sys).await,
                Event::Other(_) => Ok(()),
            }
        };
        let guarded = AssertUnwindSafe(call).catch_unwind();

        let outcome = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(format!("timed out after {limit:?}")),
            },
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("panicked: {}", panic_message(&*panic))),
        }
    }
}

impl fmt::Debug for PluginEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEngine")
            .field("units", &self.names())
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every event it sees; optionally fails or panics
    #[derive(Debug)]
    pub(crate) struct TestUnit {
        pub name: String,
        pub seen: Arc<Mutex<Vec<String>>>,
        pub calls: Arc<AtomicUsize>,
        pub mode: Mode,
        pub categories: Vec<EventCategory>,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub(crate) enum Mode {
        Ok,
        Fail,
        Panic,
        Hang,
    }

    impl TestUnit {
        pub fn new(name: &str, mode: Mode) -> Self {
            Self {
                name: name.to_string(),
                seen: Arc::new(Mutex::new(Vec::new())),
                calls: Arc::new(AtomicUsize::new(0)),
                mode,
                categories: vec![EventCategory::Message, EventCategory::SystemEvent],
            }
        }

        fn record(&self, label: String) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Ok => {
                    self.seen.lock().unwrap().push(label);
                    Ok(())
                }
                Mode::Fail => Err(Error::plugin(&self.name, "always fails")),
                Mode::Panic => panic!("unit {} exploded", self.name),
                Mode::Hang => Ok(()),
            }
        }
    }

    #[async_trait]
    impl PluginUnit for TestUnit {
        fn name(&self) -> &str {
            &self.name
        }

        fn handles(&self, category: EventCategory) -> bool {
            self.categories.contains(&category)
        }

        async fn on_message(&self, message: &ChatMessage) -> Result<()> {
            if self.mode == Mode::Hang {
                std::future::pending::<()>().await;
            }
            self.record(message.content.clone())
        }

        async fn on_system_event(&self, event: &SystemEvent) -> Result<()> {
            self.record(event.kind.clone())
        }
    }

    pub(crate) fn dyn_unit(unit: &Arc<TestUnit>) -> Arc<dyn PluginUnit> {
        Arc::clone(unit) as Arc<dyn PluginUnit>
    }

    fn engine_with(units: Vec<Arc<dyn PluginUnit>>) -> PluginEngine {
        let engine = PluginEngine::new(PluginLoader::new(
            PluginFactories::empty(),
            loader::tests::test_context(),
        ));
        engine.replace(units);
        engine
    }

    fn message(text: &str) -> Event {
        Event::from_frame(&format!(r#"{{"msg":"{text}","chat_id":1}}"#)).unwrap()
    }

    #[tokio::test]
    async fn test_failing_unit_does_not_block_others() {
        for bad_mode in [Mode::Fail, Mode::Panic] {
            let bad = Arc::new(TestUnit::new("bad", bad_mode));
            let good = Arc::new(TestUnit::new("good", Mode::Ok));
            let engine = engine_with(vec![dyn_unit(&bad), dyn_unit(&good)]);

            for i in 0..5 {
                let report = engine
                    .dispatch(EventCategory::Message, &message(&format!("m{i}")))
                    .await;
                assert_eq!(report.failed, vec!["bad"]);
                assert_eq!(report.delivered, vec!["good"]);
            }

            assert_eq!(
                *good.seen.lock().unwrap(),
                vec!["m0", "m1", "m2", "m3", "m4"]
            );
            assert_eq!(bad.calls.load(Ordering::SeqCst), 5);
        }
    }

    #[tokio::test]
    async fn test_dispatch_follows_registry_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut units: Vec<Arc<dyn PluginUnit>> = Vec::new();
        for name in ["c", "a", "b"] {
            let mut unit = TestUnit::new(name, Mode::Ok);
            unit.seen = Arc::clone(&order);
            units.push(Arc::new(unit));
        }
        let engine = engine_with(units);

        let report = engine.dispatch(EventCategory::Message, &message("x")).await;
        assert_eq!(report.delivered, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_units_without_handler_are_skipped() {
        let mut only_msgs = TestUnit::new("msgs", Mode::Ok);
        only_msgs.categories = vec![EventCategory::Message];
        let only_msgs = Arc::new(only_msgs);
        let engine = engine_with(vec![dyn_unit(&only_msgs)]);

        let event = Event::from_frame(r#"{"type":"stend_event","event":"MESSAGE_DELETE"}"#).unwrap();
        let report = engine.dispatch(EventCategory::SystemEvent, &event).await;
        assert_eq!(report.invoked(), 0);
        assert_eq!(only_msgs.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_category_mismatch_dispatches_nothing() {
        let unit = Arc::new(TestUnit::new("u", Mode::Ok));
        let engine = engine_with(vec![dyn_unit(&unit)]);
        let report = engine.dispatch(EventCategory::SystemEvent, &message("x")).await;
        assert_eq!(report.invoked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_isolates_hung_unit() {
        let hung = Arc::new(TestUnit::new("hung", Mode::Hang));
        let good = Arc::new(TestUnit::new("good", Mode::Ok));
        let engine = engine_with(vec![dyn_unit(&hung), dyn_unit(&good)])
            .with_handler_timeout(Some(Duration::from_millis(100)));

        let report = engine.dispatch(EventCategory::Message, &message("hi")).await;
        assert_eq!(report.failed, vec!["hung"]);
        assert_eq!(report.delivered, vec!["good"]);
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_registry() {
        let engine = engine_with(vec![dyn_unit(&Arc::new(TestUnit::new("old", Mode::Ok)))]);
        let before = engine.snapshot();

        engine.replace(vec![
            dyn_unit(&Arc::new(TestUnit::new("new1", Mode::Ok))),
            dyn_unit(&Arc::new(TestUnit::new("new2", Mode::Ok))),
        ]);

        assert_eq!(before.len(), 1);
        assert_eq!(engine.names(), vec!["new1", "new2"]);
    }
}
