//! Runtime-loaded inspector extensions.
//!
//! Deployments add push and pull inspectors without the core depending on
//! their packaging. A configured module location is either the name of a
//! plugin module compiled into the binary and registered in a
//! [`PluginRegistry`], or a filesystem path to a JSON manifest describing
//! executable inspectors. Compatibility is structural: a manifest value is
//! a plugin when it carries the capability marker and an `exec` member,
//! never because it is some concrete type.
//!
//! Manifest plugins run as bounded subprocesses: the Action is written to
//! the child as JSON on stdin and the child answers with a single Step as
//! JSON on stdout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::action::{Action, Step};
use crate::error::{InspectorError, PluginError};
use crate::git::GitRunner;
use crate::inspector::{Inspector, RequestContext};

/// Base marker every plugin value carries.
pub const PLUGIN_MARKER: &str = "isPackgatePlugin";
/// Marker of a push-action plugin.
pub const PUSH_MARKER: &str = "isPackgatePushActionPlugin";
/// Marker of a pull-action plugin.
pub const PULL_MARKER: &str = "isPackgatePullActionPlugin";

/// Capability of a compiled-in plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Push,
    Pull,
}

/// A compiled-in plugin instance, compatible by construction.
pub struct RegisteredPlugin {
    pub kind: PluginKind,
    pub inspector: Arc<dyn Inspector>,
}

/// Constructor producing the instances of one compiled-in plugin module.
pub type PluginFactory = fn() -> Vec<RegisteredPlugin>;

/// Compiled-in plugin modules addressable by name from the configured
/// module locations. Built once at startup and read-only afterwards.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn register(&mut self, name: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(name.into(), factory);
    }

    fn get(&self, name: &str) -> Option<PluginFactory> {
        self.factories.get(name).copied()
    }
}

/// True when `value` carries `marker`, the base plugin marker is set, and
/// an `exec` member names the executable.
pub fn is_compatible(value: &Value, marker: &str) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    object.contains_key(marker)
        && object
            .get(PLUGIN_MARKER)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        && object.get("exec").is_some_and(Value::is_string)
}

/// One resolved module location, before its plugin values are extracted.
enum PluginModule {
    /// A registry entry: a constructor whose instances are compatible.
    Factory(PluginFactory),
    /// A parsed JSON manifest exporting one plugin or a named collection.
    Manifest { dir: PathBuf, value: Value },
}

/// An inspector backed by an executable described in a manifest.
struct ExternalPlugin {
    name: &'static str,
    program: PathBuf,
    dir: PathBuf,
    git: GitRunner,
}

#[async_trait]
impl Inspector for ExternalPlugin {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let payload = serde_json::to_vec(action).map_err(|e| {
            InspectorError::failed(format!("Plugin {} cannot encode action: {e}", self.name))
        })?;
        let program = self.program.to_string_lossy().into_owned();
        let (output, code) = self
            .git
            .run_with_status(&program, &[], Some(&self.dir), Some(&payload))
            .await
            .map_err(|e| {
                InspectorError::failed(format!("Plugin {} failed: {e}", self.name))
            })?;
        if code != 0 {
            return Err(InspectorError::failed(format!(
                "Plugin {} exited with status {code}: {}",
                self.name,
                output.stderr.trim()
            )));
        }
        let step: Step = serde_json::from_str(output.stdout.trim()).map_err(|e| {
            InspectorError::failed(format!(
                "Plugin {} returned an invalid step: {e}",
                self.name
            ))
        })?;
        action.add_step(step);
        Ok(())
    }
}

/// Loads the configured plugin modules and partitions their plugin values
/// by capability. One malformed module never aborts the others.
pub struct PluginLoader {
    targets: Vec<String>,
    registry: PluginRegistry,
    git: GitRunner,
    pub push_plugins: Vec<Arc<dyn Inspector>>,
    pub pull_plugins: Vec<Arc<dyn Inspector>>,
}

impl PluginLoader {
    pub fn new(targets: Vec<String>, registry: PluginRegistry, git: GitRunner) -> PluginLoader {
        if targets.is_empty() {
            debug!("No plugins configured");
        }
        PluginLoader {
            targets,
            registry,
            git,
            push_plugins: Vec::new(),
            pull_plugins: Vec::new(),
        }
    }

    /// Load every configured module location. Must complete before the
    /// plugin lists are read.
    pub fn load(&mut self) {
        let mut modules = Vec::new();
        for target in &self.targets {
            match self.load_module(target) {
                Ok(module) => modules.push(module),
                Err(e) => error!("Failed to load plugin: {e}"),
            }
        }
        debug!("Found {} plugin modules", modules.len());

        for module in modules {
            let (push, pull) = self.plugin_values(module);
            self.push_plugins.extend(push);
            self.pull_plugins.extend(pull);
        }

        for plugin in self.push_plugins.iter().chain(&self.pull_plugins) {
            info!("Loaded plugin: {}", plugin.name());
        }
    }

    /// Resolve one module location: a registry name, a manifest file, or a
    /// directory holding a `plugin.json`.
    fn load_module(&self, target: &str) -> Result<PluginModule, PluginError> {
        if let Some(factory) = self.registry.get(target) {
            return Ok(PluginModule::Factory(factory));
        }
        let path = Path::new(target);
        let manifest = if path.is_dir() {
            path.join("plugin.json")
        } else {
            path.to_path_buf()
        };
        let dir = manifest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let raw = std::fs::read_to_string(&manifest).map_err(|source| PluginError::Read {
            path: manifest.clone(),
            source,
        })?;
        let value = serde_json::from_str(&raw).map_err(|source| PluginError::Parse {
            path: manifest,
            source,
        })?;
        Ok(PluginModule::Manifest { dir, value })
    }

    /// Extract a module's plugin values, classified by capability.
    #[allow(clippy::type_complexity)]
    fn plugin_values(
        &self,
        module: PluginModule,
    ) -> (Vec<Arc<dyn Inspector>>, Vec<Arc<dyn Inspector>>) {
        let mut push = Vec::new();
        let mut pull = Vec::new();
        match module {
            PluginModule::Factory(factory) => {
                for plugin in factory() {
                    match plugin.kind {
                        PluginKind::Push => {
                            debug!("found push plugin {}", plugin.inspector.name());
                            push.push(plugin.inspector);
                        }
                        PluginKind::Pull => {
                            debug!("found pull plugin {}", plugin.inspector.name());
                            pull.push(plugin.inspector);
                        }
                    }
                }
            }
            PluginModule::Manifest { dir, value } => {
                if is_compatible(&value, PLUGIN_MARKER) {
                    // A single plugin exported directly.
                    self.handle_value(&dir, None, &value, &mut push, &mut pull);
                } else if let Some(object) = value.as_object() {
                    // A named collection; non-plugin members are ignored.
                    for (key, member) in object {
                        if is_compatible(member, PLUGIN_MARKER) {
                            self.handle_value(&dir, Some(key), member, &mut push, &mut pull);
                        }
                    }
                }
            }
        }
        (push, pull)
    }

    fn handle_value(
        &self,
        dir: &Path,
        key: Option<&str>,
        value: &Value,
        push: &mut Vec<Arc<dyn Inspector>>,
        pull: &mut Vec<Arc<dyn Inspector>>,
    ) {
        if is_compatible(value, PUSH_MARKER) {
            let plugin = self.external(dir, key, value);
            debug!("found push plugin {}", plugin.name());
            push.push(plugin);
        } else if is_compatible(value, PULL_MARKER) {
            let plugin = self.external(dir, key, value);
            debug!("found pull plugin {}", plugin.name());
            pull.push(plugin);
        } else {
            error!(
                "Object {} does not seem to be a compatible plugin type",
                key.unwrap_or("plugin")
            );
        }
    }

    fn external(&self, dir: &Path, key: Option<&str>, value: &Value) -> Arc<dyn Inspector> {
        let exec = value.get("exec").and_then(Value::as_str).unwrap_or_default();
        let program = if Path::new(exec).is_absolute() {
            PathBuf::from(exec)
        } else {
            dir.join(exec)
        };
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| key.map(str::to_string))
            .or_else(|| {
                program
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "plugin".to_string());
        Arc::new(ExternalPlugin {
            // The loader runs once at startup and plugins live for the
            // whole process, so the leaked name is bounded.
            name: Box::leak(name.into_boxed_str()),
            program,
            dir: dir.to_path_buf(),
            git: self.git.clone(),
        })
    }
}

// =====================================================================
// Tests
// =====================================================================
