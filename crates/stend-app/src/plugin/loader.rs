//! Plugin loader: discovers `*.toml` manifests and builds units from them.
//!
//! Each manifest names a `kind`; the [`PluginFactories`] table maps kinds to
//! constructors. The file stem is the unit name.
//!
//! ```text
//! plugins/
//! ├── pong.toml        kind = "responder"   -> unit "pong"
//! ├── archive.toml     kind = "command"     -> unit "archive"
//! └── notes.txt        ignored
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use stend_core::prelude::*;
use stend_daemon::SubsystemClient;

use super::builtin;
use super::PluginUnit;
use crate::shared_state::SharedState;
use crate::store::PersistentStore;

const MANIFEST_EXTENSION: &str = "toml";

/// Parsed plugin manifest
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    /// Factory kind, e.g. `responder`
    pub kind: String,

    /// Disabled manifests are skipped without a warning
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Kind-specific settings
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl PluginManifest {
    /// Deserialize the `[config]` table into a kind-specific type
    pub fn config_as<T: serde::de::DeserializeOwned>(&self, unit: &str) -> Result<T> {
        self.config
            .clone()
            .try_into()
            .map_err(|e| Error::plugin(unit, format!("invalid [config]: {e}")))
    }
}

/// Services handed to plugin factories
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub subsystem: SubsystemClient,
    pub store: PersistentStore,
    pub shared: SharedState,
}

/// Builds a unit from its manifest
pub type PluginFactory =
    Arc<dyn Fn(&str, &PluginManifest, &PluginContext) -> Result<Arc<dyn PluginUnit>> + Send + Sync>;

/// Kind name -> factory table
#[derive(Clone, Default)]
pub struct PluginFactories {
    factories: HashMap<String, PluginFactory>,
}

impl PluginFactories {
    /// Table with no kinds registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table with the built-in `responder`, `command` and `state` kinds
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register("responder", |name, manifest, ctx| {
            Ok(Arc::new(builtin::Responder::from_manifest(name, manifest, ctx)?) as Arc<dyn PluginUnit>)
        });
        table.register("command", |name, manifest, _ctx| {
            Ok(Arc::new(builtin::CommandPlugin::from_manifest(name, manifest)?) as Arc<dyn PluginUnit>)
        });
        table.register("state", |name, manifest, ctx| {
            Ok(Arc::new(builtin::StateRecorder::from_manifest(name, manifest, ctx)?) as Arc<dyn PluginUnit>)
        });
        table
    }

    /// Register (or replace) a factory for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&str, &PluginManifest, &PluginContext) -> Result<Arc<dyn PluginUnit>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn get(&self, kind: &str) -> Option<&PluginFactory> {
        self.factories.get(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl fmt::Debug for PluginFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginFactories")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Discovered manifest ready for construction
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub name: String,
    pub manifest_path: PathBuf,
    pub manifest: PluginManifest,
}

#[derive(Debug, Clone)]
pub struct PluginLoader {
    factories: PluginFactories,
    context: PluginContext,
}

impl PluginLoader {
    pub fn new(factories: PluginFactories, context: PluginContext) -> Self {
        Self { factories, context }
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    /// Build every loadable unit in `dir`, in file-name order
    ///
    /// Anything that fails (unreadable file, bad TOML, unknown kind, factory
    /// error) is logged and skipped.
    pub async fn load_dir(&self, dir: &Path) -> Vec<Arc<dyn PluginUnit>> {
        let discovered = match discover_plugins(dir).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Cannot read plugin directory {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut units = Vec::with_capacity(discovered.len());
        for plugin in discovered {
            if !plugin.manifest.enabled {
                debug!("Plugin {} disabled, skipping", plugin.name);
                continue;
            }
            match self.build(&plugin) {
                Ok(unit) => {
                    info!("Loaded plugin {} ({})", plugin.name, plugin.manifest.kind);
                    units.push(unit);
                }
                Err(e) => warn!(
                    "Failed to load plugin {} from {}: {}",
                    plugin.name,
                    plugin.manifest_path.display(),
                    e
                ),
            }
        }
        units
    }

    fn build(&self, plugin: &DiscoveredPlugin) -> Result<Arc<dyn PluginUnit>> {
        let factory = self.factories.get(&plugin.manifest.kind).ok_or_else(|| {
            Error::plugin_load(
                &plugin.manifest_path,
                format!(
                    "unknown kind '{}' (known: {})",
                    plugin.manifest.kind,
                    self.factories.kinds().join(", ")
                ),
            )
        })?;
        factory(&plugin.name, &plugin.manifest, &self.context)
    }
}

/// Scan `dir` for `*.toml` manifests, sorted by file name
///
/// A missing directory yields no plugins. Manifests that cannot be parsed
/// are logged and skipped.
pub async fn discover_plugins(dir: &Path) -> Result<Vec<DiscoveredPlugin>> {
    let mut discovered = Vec::new();

    if !dir.exists() {
        debug!("Plugin directory does not exist: {}", dir.display());
        return Ok(discovered);
    }

    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_manifest = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXTENSION);
        if is_manifest {
            paths.push(path);
        }
    }
    paths.sort();

    for manifest_path in paths {
        let Some(name) = manifest_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from)
        else {
            continue;
        };

        match load_manifest(&manifest_path).await {
            Ok(manifest) => discovered.push(DiscoveredPlugin {
                name,
                manifest_path,
                manifest,
            }),
            Err(e) => warn!(
                "Failed to load plugin manifest at {}: {}",
                manifest_path.display(),
                e
            ),
        }
    }

    Ok(discovered)
}

/// Read and parse one manifest file
pub async fn load_manifest(path: &Path) -> Result<PluginManifest> {
    let content = tokio::fs::read_to_string(path).await?;
    toml::from_str(&content).map_err(|e| Error::plugin_load(path, e.to_string()))
}
