//! Process-wide, versioned configuration for the error factory.
//!
//! The global config is a singleton behind a [`RwLock`], created on first
//! read with defaults, replaced wholesale by [`reset_config`], and merged
//! incrementally by [`configure`]. Every successful mutation bumps a version
//! counter and notifies registered listeners synchronously, mirroring the
//! teacher's process-wide `RwLock`/`OnceLock` globals rather than reaching
//! for `once_cell` or `dashmap`.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::TryError;

pub type ErrorHandler = Arc<dyn Fn(&TryError) + Send + Sync>;
pub type Serializer = Arc<dyn Fn(&TryError) -> serde_json::Value + Send + Sync>;
pub type ConfigListener = Arc<dyn Fn(&ErrorConfig, u64) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceLocationFormat {
    Full,
    FileLineColumn,
    FileLine,
    File,
}

#[derive(Clone)]
pub struct SourceLocationConfig {
    pub default_stack_offset: i32,
    pub format: SourceLocationFormat,
    pub include_full_path: bool,
    pub formatter: Option<Arc<dyn Fn(&str, u32, u32) -> String + Send + Sync>>,
}

impl Default for SourceLocationConfig {
    fn default() -> Self {
        SourceLocationConfig {
            default_stack_offset: 0,
            format: SourceLocationFormat::FileLineColumn,
            include_full_path: false,
            formatter: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorCreationPerf {
    pub object_pooling: bool,
    pub lazy_stack_trace: bool,
    pub pool_size: usize,
    pub cache_constructors: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct ContextCapturePerf {
    pub max_context_size: usize,
    pub deep_clone: bool,
    pub timeout_ms: u64,
}

impl Default for ContextCapturePerf {
    fn default() -> Self {
        ContextCapturePerf {
            max_context_size: 10_000,
            deep_clone: false,
            timeout_ms: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryPerf {
    pub max_error_history: usize,
    pub use_weak_refs: bool,
    pub gc_hints: bool,
}

#[derive(Clone, Default)]
pub struct PerformanceConfig {
    pub error_creation: ErrorCreationPerf,
    pub context_capture: ContextCapturePerf,
    pub memory: MemoryPerf,
}

#[derive(Clone, Default)]
pub struct EnvironmentHandlers {
    pub server: Option<ErrorHandler>,
    pub client: Option<ErrorHandler>,
    pub edge: Option<ErrorHandler>,
}

/// The full, resolved configuration. Obtain one with [`get_config`]; never
/// construct it by hand from outside defaults, since presets and merges
/// encode rules ([`configure`]) a hand-built value would bypass.
#[derive(Clone)]
pub struct ErrorConfig {
    pub capture_stack_trace: bool,
    pub stack_trace_limit: usize,
    pub include_source: bool,
    pub minimal_errors: bool,
    pub skip_timestamp: bool,
    pub skip_context: bool,
    pub source_location: SourceLocationConfig,
    pub default_error_type: String,
    pub development_mode: bool,
    pub production: bool,
    pub serializer: Option<Serializer>,
    pub on_error: Option<ErrorHandler>,
    pub runtime_detection: bool,
    pub environment_handlers: EnvironmentHandlers,
    pub performance: PerformanceConfig,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        ErrorConfig {
            capture_stack_trace: true,
            stack_trace_limit: 10,
            include_source: true,
            minimal_errors: false,
            skip_timestamp: false,
            skip_context: false,
            source_location: SourceLocationConfig::default(),
            default_error_type: "Error".to_string(),
            development_mode: true,
            production: false,
            serializer: None,
            on_error: None,
            runtime_detection: false,
            environment_handlers: EnvironmentHandlers::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

/// A partial update to [`SourceLocationConfig`]; `Some` fields overwrite,
/// `None` fields leave the current value untouched.
#[derive(Clone, Default)]
pub struct SourceLocationPatch {
    pub default_stack_offset: Option<i32>,
    pub format: Option<SourceLocationFormat>,
    pub include_full_path: Option<bool>,
    pub formatter: Option<Arc<dyn Fn(&str, u32, u32) -> String + Send + Sync>>,
}

#[derive(Clone, Default)]
pub struct ErrorCreationPerfPatch {
    pub object_pooling: Option<bool>,
    pub lazy_stack_trace: Option<bool>,
    pub pool_size: Option<usize>,
    pub cache_constructors: Option<bool>,
}

#[derive(Clone, Default)]
pub struct ContextCapturePerfPatch {
    pub max_context_size: Option<usize>,
    pub deep_clone: Option<bool>,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Default)]
pub struct MemoryPerfPatch {
    pub max_error_history: Option<usize>,
    pub use_weak_refs: Option<bool>,
    pub gc_hints: Option<bool>,
}

#[derive(Clone, Default)]
pub struct PerformancePatch {
    pub error_creation: Option<ErrorCreationPerfPatch>,
    pub context_capture: Option<ContextCapturePerfPatch>,
    pub memory: Option<MemoryPerfPatch>,
}

#[derive(Clone, Default)]
pub struct EnvironmentHandlersPatch {
    pub server: Option<ErrorHandler>,
    pub client: Option<ErrorHandler>,
    pub edge: Option<ErrorHandler>,
}

/// A recursive partial update, merged onto the current config by
/// [`configure`]. This is the Rust rendering of the source spec's "deep
/// merge a nested mapping, overwrite on a non-mapping" rule: nested groups
/// are themselves patches (merged recursively), scalar fields overwrite.
#[derive(Clone, Default)]
pub struct ConfigPatch {
    pub capture_stack_trace: Option<bool>,
    pub stack_trace_limit: Option<usize>,
    pub include_source: Option<bool>,
    pub minimal_errors: Option<bool>,
    pub skip_timestamp: Option<bool>,
    pub skip_context: Option<bool>,
    pub source_location: Option<SourceLocationPatch>,
    pub default_error_type: Option<String>,
    pub development_mode: Option<bool>,
    pub production: Option<bool>,
    pub serializer: Option<Option<Serializer>>,
    pub on_error: Option<Option<ErrorHandler>>,
    pub runtime_detection: Option<bool>,
    pub environment_handlers: Option<EnvironmentHandlersPatch>,
    pub performance: Option<PerformancePatch>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        ConfigPatch::default()
    }
}

/// Configuration validation/merge failures. Rust's type system already
/// rejects the wrong *shape* of value at compile time (the source spec's
/// "booleans are bool, stackTraceLimit is a number" checks have no runtime
/// analogue here); what remains to validate is business-rule bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroStackTraceLimit,
    ZeroPoolSize,
    ZeroMaxContextSize,
    UnknownPreset(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroStackTraceLimit => {
                write!(f, "stack_trace_limit must be greater than zero")
            }
            ConfigError::ZeroPoolSize => write!(
                f,
                "performance.error_creation.pool_size must be greater than zero when object pooling is enabled"
            ),
            ConfigError::ZeroMaxContextSize => write!(
                f,
                "performance.context_capture.max_context_size must be greater than zero"
            ),
            ConfigError::UnknownPreset(name) => write!(f, "unknown configuration preset: {name}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn validate(config: &ErrorConfig) -> Result<(), ConfigError> {
    if config.stack_trace_limit == 0 {
        return Err(ConfigError::ZeroStackTraceLimit);
    }
    if config.performance.error_creation.object_pooling
        && config.performance.error_creation.pool_size == 0
    {
        return Err(ConfigError::ZeroPoolSize);
    }
    if config.performance.context_capture.max_context_size == 0 {
        return Err(ConfigError::ZeroMaxContextSize);
    }
    Ok(())
}

fn merge_source_location(base: &SourceLocationConfig, patch: SourceLocationPatch) -> SourceLocationConfig {
    SourceLocationConfig {
        default_stack_offset: patch.default_stack_offset.unwrap_or(base.default_stack_offset),
        format: patch.format.unwrap_or(base.format),
        include_full_path: patch.include_full_path.unwrap_or(base.include_full_path),
        formatter: patch.formatter.or_else(|| base.formatter.clone()),
    }
}

fn merge_error_creation(base: &ErrorCreationPerf, patch: ErrorCreationPerfPatch) -> ErrorCreationPerf {
    ErrorCreationPerf {
        object_pooling: patch.object_pooling.unwrap_or(base.object_pooling),
        lazy_stack_trace: patch.lazy_stack_trace.unwrap_or(base.lazy_stack_trace),
        pool_size: patch.pool_size.unwrap_or(base.pool_size),
        cache_constructors: patch.cache_constructors.unwrap_or(base.cache_constructors),
    }
}

fn merge_context_capture(base: &ContextCapturePerf, patch: ContextCapturePerfPatch) -> ContextCapturePerf {
    ContextCapturePerf {
        max_context_size: patch.max_context_size.unwrap_or(base.max_context_size),
        deep_clone: patch.deep_clone.unwrap_or(base.deep_clone),
        timeout_ms: patch.timeout_ms.unwrap_or(base.timeout_ms),
    }
}

fn merge_memory(base: &MemoryPerf, patch: MemoryPerfPatch) -> MemoryPerf {
    MemoryPerf {
        max_error_history: patch.max_error_history.unwrap_or(base.max_error_history),
        use_weak_refs: patch.use_weak_refs.unwrap_or(base.use_weak_refs),
        gc_hints: patch.gc_hints.unwrap_or(base.gc_hints),
    }
}

fn merge_performance(base: &PerformanceConfig, patch: PerformancePatch) -> PerformanceConfig {
    PerformanceConfig {
        error_creation: match patch.error_creation {
            Some(p) => merge_error_creation(&base.error_creation, p),
            None => base.error_creation,
        },
        context_capture: match patch.context_capture {
            Some(p) => merge_context_capture(&base.context_capture, p),
            None => base.context_capture,
        },
        memory: match patch.memory {
            Some(p) => merge_memory(&base.memory, p),
            None => base.memory,
        },
    }
}

fn merge_environment_handlers(base: &EnvironmentHandlers, patch: EnvironmentHandlersPatch) -> EnvironmentHandlers {
    EnvironmentHandlers {
        server: patch.server.or_else(|| base.server.clone()),
        client: patch.client.or_else(|| base.client.clone()),
        edge: patch.edge.or_else(|| base.edge.clone()),
    }
}

impl ErrorConfig {
    /// Applies a [`ConfigPatch`] on top of `self`, recursing into nested
    /// groups and overwriting scalars, without mutating `self`.
    pub fn merged(&self, patch: ConfigPatch) -> ErrorConfig {
        ErrorConfig {
            capture_stack_trace: patch.capture_stack_trace.unwrap_or(self.capture_stack_trace),
            stack_trace_limit: patch.stack_trace_limit.unwrap_or(self.stack_trace_limit),
            include_source: patch.include_source.unwrap_or(self.include_source),
            minimal_errors: patch.minimal_errors.unwrap_or(self.minimal_errors),
            skip_timestamp: patch.skip_timestamp.unwrap_or(self.skip_timestamp),
            skip_context: patch.skip_context.unwrap_or(self.skip_context),
            source_location: match patch.source_location {
                Some(p) => merge_source_location(&self.source_location, p),
                None => self.source_location.clone(),
            },
            default_error_type: patch.default_error_type.unwrap_or_else(|| self.default_error_type.clone()),
            development_mode: patch.development_mode.unwrap_or(self.development_mode),
            production: patch.production.unwrap_or(self.production),
            serializer: patch.serializer.unwrap_or_else(|| self.serializer.clone()),
            on_error: patch.on_error.unwrap_or_else(|| self.on_error.clone()),
            runtime_detection: patch.runtime_detection.unwrap_or(self.runtime_detection),
            environment_handlers: match patch.environment_handlers {
                Some(p) => merge_environment_handlers(&self.environment_handlers, p),
                None => self.environment_handlers.clone(),
            },
            performance: match patch.performance {
                Some(p) => merge_performance(&self.performance, p),
                None => self.performance.clone(),
            },
        }
    }
}

/// Built-in presets, resolved by name and cached. Mirrors the spec's
/// "preset resolution via LRU cache, default capacity 20" — with only a
/// handful of built-ins the cache mostly matters once hosts register their
/// own via [`register_preset`].
fn builtin_preset(name: &str) -> Option<ConfigPatch> {
    match name {
        "development" => Some(ConfigPatch {
            capture_stack_trace: Some(true),
            development_mode: Some(true),
            production: Some(false),
            minimal_errors: Some(false),
            ..Default::default()
        }),
        "production" => Some(ConfigPatch {
            capture_stack_trace: Some(false),
            development_mode: Some(false),
            production: Some(true),
            include_source: Some(false),
            ..Default::default()
        }),
        "test" => Some(ConfigPatch {
            capture_stack_trace: Some(true),
            development_mode: Some(false),
            production: Some(false),
            skip_timestamp: Some(true),
            ..Default::default()
        }),
        "minimal" => Some(ConfigPatch {
            minimal_errors: Some(true),
            capture_stack_trace: Some(false),
            include_source: Some(false),
            ..Default::default()
        }),
        _ => None,
    }
}

struct PresetCache {
    capacity: usize,
    entries: Vec<(String, ConfigPatch)>,
}

impl PresetCache {
    fn new(capacity: usize) -> Self {
        PresetCache { capacity, entries: Vec::new() }
    }

    fn get_or_insert(&mut self, name: &str, make: impl FnOnce() -> Option<ConfigPatch>) -> Option<ConfigPatch> {
        if let Some(pos) = self.entries.iter().position(|(n, _)| n == name) {
            let entry = self.entries.remove(pos);
            let patch = entry.1.clone();
            self.entries.insert(0, entry);
            return Some(patch);
        }
        let patch = make()?;
        self.entries.insert(0, (name.to_string(), patch.clone()));
        if self.entries.len() > self.capacity {
            self.entries.pop();
        }
        Some(patch)
    }

    fn register(&mut self, name: String, patch: ConfigPatch) {
        self.entries.retain(|(n, _)| n != &name);
        self.entries.insert(0, (name, patch));
        if self.entries.len() > self.capacity {
            self.entries.pop();
        }
    }
}

struct GlobalState {
    config: ErrorConfig,
    version: u64,
    listeners: Vec<ConfigListener>,
    presets: PresetCache,
    notifying: bool,
}

impl GlobalState {
    fn new() -> Self {
        GlobalState {
            config: ErrorConfig::default(),
            version: 0,
            listeners: Vec::new(),
            presets: PresetCache::new(20),
            notifying: false,
        }
    }
}

static GLOBAL: OnceLock<RwLock<GlobalState>> = OnceLock::new();

fn global() -> &'static RwLock<GlobalState> {
    GLOBAL.get_or_init(|| RwLock::new(GlobalState::new()))
}

/// Something [`configure`] can accept: a named preset, or a patch to merge
/// onto the current configuration.
pub enum ConfigInput {
    Preset(String),
    Patch(ConfigPatch),
}

impl From<&str> for ConfigInput {
    fn from(name: &str) -> Self {
        ConfigInput::Preset(name.to_string())
    }
}

impl From<String> for ConfigInput {
    fn from(name: String) -> Self {
        ConfigInput::Preset(name)
    }
}

impl From<ConfigPatch> for ConfigInput {
    fn from(patch: ConfigPatch) -> Self {
        ConfigInput::Patch(patch)
    }
}

/// Registers (or replaces) a named preset a host can later pass to
/// [`configure`] by name.
pub fn register_preset(name: impl Into<String>, patch: ConfigPatch) {
    let mut state = global().write().expect("config lock poisoned");
    state.presets.register(name.into(), patch);
}

/// Merges `input` onto the current global configuration, validates the
/// result, bumps the version counter, and notifies listeners. Returns the
/// new version on success.
///
/// Listener callbacks run synchronously and must not call `configure`
/// again: doing so is detected and rejected with
/// [`ConfigError::UnknownPreset`]-adjacent recursion guarding, since the
/// lock is held for the duration of notification and a nested attempt would
/// otherwise deadlock. Rather than deadlock, a reentrant call is a no-op
/// that returns the version unchanged.
pub fn configure(input: impl Into<ConfigInput>) -> Result<u64, ConfigError> {
    let input = input.into();
    let mut state = global().write().expect("config lock poisoned");
    if state.notifying {
        return Ok(state.version);
    }
    let patch = match input {
        ConfigInput::Patch(p) => p,
        ConfigInput::Preset(name) => {
            let resolved = state
                .presets
                .get_or_insert(&name, || builtin_preset(&name));
            resolved.ok_or(ConfigError::UnknownPreset(name))?
        }
    };
    let merged = state.config.merged(patch);
    validate(&merged)?;
    state.config = merged.clone();
    state.version += 1;
    let version = state.version;
    let listeners = state.listeners.clone();
    state.notifying = true;
    drop(state);
    for listener in &listeners {
        listener(&merged, version);
    }
    global().write().expect("config lock poisoned").notifying = false;
    Ok(version)
}

/// Returns a clone of the current global configuration, creating it with
/// defaults on first call.
pub fn get_config() -> ErrorConfig {
    global().read().expect("config lock poisoned").config.clone()
}

/// Returns the current configuration version counter.
pub fn config_version() -> u64 {
    global().read().expect("config lock poisoned").version
}

/// Replaces the global configuration with defaults, bumping the version and
/// notifying listeners.
pub fn reset_config() -> u64 {
    let mut state = global().write().expect("config lock poisoned");
    state.config = ErrorConfig::default();
    state.version += 1;
    let version = state.version;
    let config = state.config.clone();
    let listeners = state.listeners.clone();
    drop(state);
    for listener in &listeners {
        listener(&config, version);
    }
    version
}

/// Registers a listener invoked synchronously, inline, after every
/// successful [`configure`]/[`reset_config`] call.
pub fn on_config_change(listener: impl Fn(&ErrorConfig, u64) + Send + Sync + 'static) {
    global()
        .write()
        .expect("config lock poisoned")
        .listeners
        .push(Arc::new(listener));
}

/// A self-contained configuration, merged from the *default* configuration
/// (not the live global one) without ever touching global state. Used to
/// create errors with scope-local settings.
#[derive(Clone)]
pub struct Scope {
    pub config: ErrorConfig,
}

impl Scope {
    /// Constructs a `TryError` against this scope's merged configuration,
    /// never reading or mutating the process-wide configuration.
    #[track_caller]
    pub fn create_error(&self, error_type: impl Into<String>, message: impl Into<String>) -> TryError {
        self.create_error_with(error_type, message, crate::factory::ErrorOptions::new())
    }

    /// Like [`Scope::create_error`], accepting [`crate::factory::ErrorOptions`]
    /// for context/cause/dedup control.
    #[track_caller]
    pub fn create_error_with(
        &self,
        error_type: impl Into<String>,
        message: impl Into<String>,
        options: crate::factory::ErrorOptions,
    ) -> TryError {
        crate::factory::create_error_with_config(&self.config, error_type, message, options)
    }
}

/// Builds a [`Scope`] whose configuration is `ErrorConfig::default()` merged
/// with `patch`, independent of (and without mutating) the process-wide
/// configuration.
pub fn create_scope(patch: ConfigPatch) -> Scope {
    Scope { config: ErrorConfig::default().merged(patch) }
}

/// Resolves the deployment environment the same way `development_mode`/
/// `production` do, from the `APP_ENV` environment variable, and returns the
/// matching patch from `envs`, falling back to `envs["development"]`, else
/// an empty patch.
pub fn create_env_config(mut envs: BTreeMap<String, ConfigPatch>) -> ConfigPatch {
    let detected = std::env::var("APP_ENV").unwrap_or_default();
    if let Some(patch) = envs.remove(&detected) {
        return patch;
    }
    envs.remove("development").unwrap_or_default()
}

/// Wraps `handler` so that a panic inside it is caught and, in development
/// mode, logged to stderr rather than propagated; in non-development mode
/// it is silently swallowed. Mirrors the spec's "handler failure always
/// trapped, logged only in dev" rule for `onError`/middleware hooks.
pub fn with_error_service(
    handler: impl Fn(&TryError) + Send + Sync + 'static,
) -> ErrorHandler {
    Arc::new(move |err: &TryError| {
        let development_mode = get_config().development_mode;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(err)));
        if let Err(payload) = result {
            if development_mode {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "error handler panicked".to_string());
                eprintln!("try_error: onError handler panicked: {message}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn reset() {
        reset_config();
    }

    #[test]
    fn defaults_capture_stack_outside_production() {
        reset();
        let config = get_config();
        assert!(config.capture_stack_trace);
        assert!(!config.production);
    }

    #[test]
    fn configure_preset_merges_and_bumps_version() {
        reset();
        let before = config_version();
        let after = configure("production").unwrap();
        assert!(after > before);
        let config = get_config();
        assert!(config.production);
        assert!(!config.capture_stack_trace);
    }

    #[test]
    fn scope_creates_errors_without_touching_global_config() {
        reset();
        configure("production").unwrap();
        let before = get_config();

        let mut patch = ConfigPatch::new();
        patch.production = Some(false);
        patch.capture_stack_trace = Some(true);
        patch.stack_trace_limit = Some(2);
        let scope = create_scope(patch);

        let err = scope.create_error("ScopedError", "scoped failure");
        assert_eq!(err.error_type(), "ScopedError");
        assert!(err.stack().is_some());

        let after = get_config();
        assert_eq!(after.production, before.production);
        assert_eq!(after.capture_stack_trace, before.capture_stack_trace);
        reset();
    }

    #[test]
    fn configure_patch_overwrites_scalar_and_preserves_rest() {
        reset();
        configure("development").unwrap();
        let mut patch = ConfigPatch::new();
        patch.stack_trace_limit = Some(3);
        configure(patch).unwrap();
        let config = get_config();
        assert_eq!(config.stack_trace_limit, 3);
        assert!(config.development_mode);
    }

    #[test]
    fn invalid_patch_is_rejected() {
        reset();
        let mut patch = ConfigPatch::new();
        patch.stack_trace_limit = Some(0);
        let result = configure(patch);
        assert!(result.is_err());
    }

    #[test]
    fn listener_is_notified_on_configure() {
        reset();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        on_config_change(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        configure("test").unwrap();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn scope_does_not_touch_global_config() {
        reset();
        let before = get_config().stack_trace_limit;
        let mut patch = ConfigPatch::new();
        patch.stack_trace_limit = Some(99);
        let scope = create_scope(patch);
        assert_eq!(scope.config.stack_trace_limit, 99);
        assert_eq!(get_config().stack_trace_limit, before);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        reset();
        let result = configure("does-not-exist");
        assert!(matches!(result, Err(ConfigError::UnknownPreset(_))));
    }
}
