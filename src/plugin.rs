//! Plugin manager: install/enable/disable/uninstall with dependency rules.
//!
//! A plugin's capability surface (middleware/error-type/utility names, and
//! a configuration patch) is recorded as metadata rather than live,
//! generically-typed callables — the spec does not fix a concrete call
//! signature for "utilities", so this module tracks what a plugin
//! contributes and leaves dispatching it to the host, the same way the
//! spec's own aggregator operations (`get_all_middleware`, etc.) are purely
//! descriptive.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::config::{ConfigPatch, ErrorConfig};

pub type Hook = Arc<dyn Fn() + Send + Sync>;
pub type ConfigChangeHook = Arc<dyn Fn(&ErrorConfig) + Send + Sync>;

#[derive(Clone, Default)]
pub struct PluginHooks {
    pub on_install: Option<Hook>,
    pub on_uninstall: Option<Hook>,
    pub on_enable: Option<Hook>,
    pub on_disable: Option<Hook>,
    pub on_config_change: Option<ConfigChangeHook>,
}

#[derive(Clone, Default)]
pub struct PluginCapabilities {
    pub config: Option<ConfigPatch>,
    pub middleware_names: Vec<String>,
    pub error_types: Vec<String>,
    pub utility_names: Vec<String>,
}

#[derive(Clone)]
pub struct Plugin {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<String>,
    pub hooks: PluginHooks,
    pub capabilities: PluginCapabilities,
}

impl Plugin {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Plugin {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            hooks: PluginHooks::default(),
            capabilities: PluginCapabilities::default(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_capabilities(mut self, capabilities: PluginCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_hooks(mut self, hooks: PluginHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    AlreadyInstalled(String),
    DependencyMissing { plugin: String, missing: String },
    NotInstalled(String),
    UninstallBlocked { plugin: String, dependent: String },
    DisableBlocked { plugin: String, dependent: String },
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginError::AlreadyInstalled(name) => write!(f, "plugin already installed: {name}"),
            PluginError::DependencyMissing { plugin, missing } => {
                write!(f, "dependency-missing: {plugin} requires {missing}")
            }
            PluginError::NotInstalled(name) => write!(f, "plugin not installed: {name}"),
            PluginError::UninstallBlocked { plugin, dependent } => write!(
                f,
                "cannot uninstall {plugin}: {dependent} still depends on it"
            ),
            PluginError::DisableBlocked { plugin, dependent } => write!(
                f,
                "cannot disable {plugin}: {dependent} still depends on it and is enabled"
            ),
        }
    }
}

impl std::error::Error for PluginError {}

struct State {
    installed: HashMap<String, Plugin>,
    install_order: Vec<String>,
    enabled: HashSet<String>,
}

/// The plugin registry: install order, dependency graph, and enabled set.
pub struct PluginManager {
    state: Mutex<State>,
}

impl PluginManager {
    pub fn new() -> Self {
        PluginManager {
            state: Mutex::new(State {
                installed: HashMap::new(),
                install_order: Vec::new(),
                enabled: HashSet::new(),
            }),
        }
    }

    /// Installs `plugin`. Fails if a plugin with the same name is already
    /// installed, or if any of its declared dependencies are not.
    pub fn install(&self, plugin: Plugin) -> Result<(), PluginError> {
        let mut state = self.state.lock().expect("plugin manager mutex poisoned");
        if state.installed.contains_key(&plugin.name) {
            return Err(PluginError::AlreadyInstalled(plugin.name));
        }
        for dep in &plugin.dependencies {
            if !state.installed.contains_key(dep) {
                return Err(PluginError::DependencyMissing {
                    plugin: plugin.name.clone(),
                    missing: dep.clone(),
                });
            }
        }
        if let Some(hook) = &plugin.hooks.on_install {
            hook();
        }
        state.install_order.push(plugin.name.clone());
        state.installed.insert(plugin.name.clone(), plugin);
        Ok(())
    }

    /// Uninstalls `name`. Fails while any other installed plugin still
    /// lists `name` as a dependency. If `name` is currently enabled, it is
    /// disabled first.
    pub fn uninstall(&self, name: &str) -> Result<(), PluginError> {
        let mut state = self.state.lock().expect("plugin manager mutex poisoned");
        if !state.installed.contains_key(name) {
            return Err(PluginError::NotInstalled(name.to_string()));
        }
        if let Some(dependent) = state
            .installed
            .values()
            .find(|p| p.dependencies.iter().any(|d| d == name))
        {
            return Err(PluginError::UninstallBlocked {
                plugin: name.to_string(),
                dependent: dependent.name.clone(),
            });
        }
        if state.enabled.remove(name) {
            if let Some(hook) = state.installed.get(name).and_then(|p| p.hooks.on_disable.clone()) {
                hook();
            }
        }
        if let Some(plugin) = state.installed.remove(name) {
            if let Some(hook) = &plugin.hooks.on_uninstall {
                hook();
            }
        }
        state.install_order.retain(|n| n != name);
        Ok(())
    }

    /// Enables `name`, first enabling any not-yet-enabled dependencies
    /// (recursively).
    pub fn enable(&self, name: &str) -> Result<(), PluginError> {
        let mut state = self.state.lock().expect("plugin manager mutex poisoned");
        self.enable_locked(&mut state, name)
    }

    fn enable_locked(&self, state: &mut State, name: &str) -> Result<(), PluginError> {
        if state.enabled.contains(name) {
            return Ok(());
        }
        let plugin = state
            .installed
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotInstalled(name.to_string()))?;
        for dep in &plugin.dependencies {
            self.enable_locked(state, dep)?;
        }
        state.enabled.insert(name.to_string());
        if let Some(hook) = &plugin.hooks.on_enable {
            hook();
        }
        Ok(())
    }

    /// Disables `name`. Fails while another *enabled* plugin depends on it.
    pub fn disable(&self, name: &str) -> Result<(), PluginError> {
        let mut state = self.state.lock().expect("plugin manager mutex poisoned");
        if !state.installed.contains_key(name) {
            return Err(PluginError::NotInstalled(name.to_string()));
        }
        if let Some(dependent) = state.enabled.iter().find_map(|enabled_name| {
            if enabled_name == name {
                return None;
            }
            state
                .installed
                .get(enabled_name)
                .filter(|p| p.dependencies.iter().any(|d| d == name))
                .map(|p| p.name.clone())
        }) {
            return Err(PluginError::DisableBlocked {
                plugin: name.to_string(),
                dependent,
            });
        }
        if state.enabled.remove(name) {
            if let Some(hook) = state.installed.get(name).and_then(|p| p.hooks.on_disable.clone()) {
                hook();
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.state.lock().expect("plugin manager mutex poisoned").enabled.contains(name)
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.state.lock().expect("plugin manager mutex poisoned").installed.contains_key(name)
    }

    pub fn install_order(&self) -> Vec<String> {
        self.state.lock().expect("plugin manager mutex poisoned").install_order.clone()
    }

    /// Folds every enabled plugin's `capabilities.config` patch, in install
    /// order, onto the current global configuration.
    pub fn get_merged_config(&self) -> ErrorConfig {
        let state = self.state.lock().expect("plugin manager mutex poisoned");
        let mut config = crate::config::get_config();
        for name in &state.install_order {
            if !state.enabled.contains(name) {
                continue;
            }
            if let Some(plugin) = state.installed.get(name) {
                if let Some(patch) = plugin.capabilities.config.clone() {
                    config = config.merged(patch);
                }
            }
        }
        config
    }

    pub fn get_all_middleware_names(&self) -> Vec<String> {
        self.collect_enabled(|p| p.capabilities.middleware_names.clone())
    }

    pub fn get_all_error_types(&self) -> Vec<String> {
        self.collect_enabled(|p| p.capabilities.error_types.clone())
    }

    pub fn get_all_utility_names(&self) -> Vec<String> {
        self.collect_enabled(|p| p.capabilities.utility_names.clone())
    }

    fn collect_enabled(&self, extract: impl Fn(&Plugin) -> Vec<String>) -> Vec<String> {
        let state = self.state.lock().expect("plugin manager mutex poisoned");
        let mut out = Vec::new();
        for name in &state.install_order {
            if !state.enabled.contains(name) {
                continue;
            }
            if let Some(plugin) = state.installed.get(name) {
                out.extend(extract(plugin));
            }
        }
        out
    }

    /// Invokes every enabled plugin's `on_config_change` hook with the
    /// current configuration.
    pub fn notify_config_change(&self, config: &ErrorConfig) {
        let state = self.state.lock().expect("plugin manager mutex poisoned");
        for name in &state.install_order {
            if !state.enabled.contains(name) {
                continue;
            }
            if let Some(hook) = state.installed.get(name).and_then(|p| p.hooks.on_config_change.clone()) {
                hook(config);
            }
        }
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        PluginManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_rejects_missing_dependency() {
        let manager = PluginManager::new();
        let b = Plugin::new("b", "1.0").with_dependencies(vec!["a".to_string()]);
        let result = manager.install(b);
        assert!(matches!(result, Err(PluginError::DependencyMissing { .. })));
    }

    #[test]
    fn install_a_then_b_succeeds_and_uninstall_order_is_enforced() {
        let manager = PluginManager::new();
        manager.install(Plugin::new("a", "1.0")).unwrap();
        manager
            .install(Plugin::new("b", "1.0").with_dependencies(vec!["a".to_string()]))
            .unwrap();
        assert!(manager.uninstall("a").is_err());
        manager.uninstall("b").unwrap();
        manager.uninstall("a").unwrap();
    }

    #[test]
    fn enable_cascades_to_dependencies() {
        let manager = PluginManager::new();
        manager.install(Plugin::new("a", "1.0")).unwrap();
        manager
            .install(Plugin::new("b", "1.0").with_dependencies(vec!["a".to_string()]))
            .unwrap();
        manager.enable("b").unwrap();
        assert!(manager.is_enabled("a"));
        assert!(manager.is_enabled("b"));
    }

    #[test]
    fn disable_forbidden_while_dependent_enabled() {
        let manager = PluginManager::new();
        manager.install(Plugin::new("a", "1.0")).unwrap();
        manager
            .install(Plugin::new("b", "1.0").with_dependencies(vec!["a".to_string()]))
            .unwrap();
        manager.enable("b").unwrap();
        let result = manager.disable("a");
        assert!(matches!(result, Err(PluginError::DisableBlocked { .. })));
    }

    #[test]
    fn merged_config_applies_enabled_plugin_patches() {
        crate::config::reset_config();
        let manager = PluginManager::new();
        let mut patch = ConfigPatch::new();
        patch.stack_trace_limit = Some(2);
        manager
            .install(
                Plugin::new("a", "1.0").with_capabilities(PluginCapabilities {
                    config: Some(patch),
                    ..Default::default()
                }),
            )
            .unwrap();
        manager.enable("a").unwrap();
        assert_eq!(manager.get_merged_config().stack_trace_limit, 2);
    }
}
