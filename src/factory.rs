//! The error factory: [`create_error`], [`wrap_error`], [`from_thrown`], and
//! the four creation paths the global configuration selects between
//! (minimal, production-fast, lazy, normal).

use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::Location;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{get_config, ErrorConfig, SourceLocationConfig, SourceLocationFormat};
use crate::context::{canonical_json_string, ContextValue};
use crate::events::emit;
use crate::intern;
use crate::lazy::LazyField;
use crate::pool::Pool;
use crate::TryError;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn format_location(location: &Location<'static>, cfg: &SourceLocationConfig) -> String {
    if let Some(formatter) = &cfg.formatter {
        return formatter(location.file(), location.line(), location.column());
    }
    let file = if cfg.include_full_path {
        location.file().to_string()
    } else {
        Path::new(location.file())
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| location.file().to_string())
    };
    match cfg.format {
        SourceLocationFormat::Full => {
            format!("{}:{}:{}", location.file(), location.line(), location.column())
        }
        SourceLocationFormat::FileLineColumn => format!("{}:{}:{}", file, location.line(), location.column()),
        SourceLocationFormat::FileLine => format!("{}:{}", file, location.line()),
        SourceLocationFormat::File => file,
    }
}

/// A pool of scratch buffers reused while formatting a stack string, so
/// that enabling `performance.error_creation.object_pooling` measurably cuts
/// allocation churn on the hot creation path without changing the crate's
/// `TryError`-by-value API: the pool lives entirely inside this module,
/// buffers are acquired, written into, frozen into an owned `String`, and
/// returned before `create_error` returns.
fn stack_buffer_pool() -> &'static Pool<String> {
    static POOL: OnceLock<Pool<String>> = OnceLock::new();
    POOL.get_or_init(|| Pool::new(100))
}

/// A pool of reusable `TryError` slots for `performance.error_creation.object_pooling`.
/// Acquiring a slot reuses a previous error's `error_type`/`message` string
/// allocations (cleared and rewritten in place) instead of allocating fresh
/// ones; the slot is cloned into the value handed back to the caller and
/// released immediately, the same acquire/write/clone/release shape
/// `stack_buffer_pool` uses for scratch stack-formatting buffers.
fn error_slot_pool() -> &'static Pool<TryError> {
    static POOL: OnceLock<Pool<TryError>> = OnceLock::new();
    POOL.get_or_init(|| Pool::new(128))
}

fn blank_error() -> TryError {
    TryError::new(
        String::new(),
        String::new(),
        LazyField::eager(String::new()),
        LazyField::eager(0),
        LazyField::eager(None),
        None,
        None,
    )
}

/// Builds the final `TryError` from fully-resolved (or lazily-deferred)
/// field values, going through the pooled slot path when
/// `performance.error_creation.object_pooling` is enabled, otherwise
/// allocating a fresh value directly.
#[allow(clippy::too_many_arguments)]
fn construct(
    config: &ErrorConfig,
    error_type: String,
    message: String,
    source: LazyField<String>,
    timestamp: LazyField<u64>,
    stack: LazyField<Option<String>>,
    context: Option<ContextValue>,
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
) -> TryError {
    if !config.performance.error_creation.object_pooling {
        return TryError::new(error_type, message, source, timestamp, stack, context, cause);
    }
    let pool = error_slot_pool();
    let mut slot = pool.acquire(blank_error, |_| {});
    {
        let reused = slot.get_mut();
        reused.error_type.clear();
        reused.error_type.push_str(&error_type);
        reused.message.clear();
        reused.message.push_str(&message);
        reused.source = source;
        reused.timestamp = timestamp;
        reused.stack = stack;
        reused.context = context;
        reused.cause = cause;
    }
    let result = slot.get().clone();
    pool.release(slot);
    result
}

fn capture_stack(error_type: &str, message: &str, limit: usize) -> Option<String> {
    let backtrace = std::backtrace::Backtrace::force_capture();
    let mut slot = stack_buffer_pool().acquire(String::new, |s| s.clear());
    let buf = slot.get_mut();
    buf.push_str(error_type);
    buf.push_str(": ");
    buf.push_str(message);
    let mut lines_written = 0usize;
    for line in backtrace.to_string().lines() {
        if lines_written >= limit {
            break;
        }
        buf.push('\n');
        buf.push_str(line);
        lines_written += 1;
    }
    let result = slot.get().clone();
    stack_buffer_pool().release(slot);
    Some(result)
}

/// Options accepted by [`create_error_with`]. Constructed via
/// [`ErrorOptions::new`] and its builder methods.
#[derive(Default)]
pub struct ErrorOptions {
    pub context: Option<ContextValue>,
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    pub force_stack_capture: bool,
}

impl ErrorOptions {
    pub fn new() -> Self {
        ErrorOptions::default()
    }

    /// Attaches `context`. Spec invariant (iii) requires a present context
    /// to be a non-array mapping, so a non-`Map` value is wrapped under a
    /// `"value"` key rather than attached as-is.
    pub fn with_context(mut self, context: ContextValue) -> Self {
        self.context = Some(if context.is_map() {
            context
        } else {
            let mut map = BTreeMap::new();
            map.insert("value".to_string(), context);
            ContextValue::Map(map)
        });
        self
    }

    pub fn with_cause(mut self, cause: Arc<dyn std::error::Error + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Opts this creation out of the dedup cache even if an identical
    /// `(type, message, context)` entry already exists, guaranteeing a
    /// fresh stack capture. See the dedup cache note on [`create_error`].
    pub fn force_stack_capture(mut self) -> Self {
        self.force_stack_capture = true;
        self
    }
}

struct CacheEntry {
    source: String,
    stack: Option<String>,
    timestamp: u64,
}

struct DedupCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Arc<CacheEntry>>,
}

impl DedupCache {
    fn new(capacity: usize) -> Self {
        DedupCache {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn key(error_type: &str, message: &str, context_json: &str) -> String {
        format!("{error_type}\u{1}{message}\u{1}{context_json}")
    }

    fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, entry: Arc<CacheEntry>) {
        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
        self.entries.insert(key, entry);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn dedup_cache() -> &'static Mutex<DedupCache> {
    static CACHE: OnceLock<Mutex<DedupCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(DedupCache::new(1000)))
}

#[cfg(test)]
pub(crate) fn dedup_cache_len() -> usize {
    dedup_cache().lock().expect("dedup cache poisoned").len()
}

fn finalize(config: &ErrorConfig, error: TryError) -> TryError {
    if let Some(on_error) = &config.on_error {
        on_error(&error);
    }
    if config.runtime_detection {
        let handler = if cfg!(target_arch = "wasm32") {
            &config.environment_handlers.edge
        } else {
            &config.environment_handlers.server
        };
        if let Some(handler) = handler {
            handler(&error);
        }
    }
    emit("error:created", &error);
    error
}

/// Creates a new [`TryError`] using the current process-wide configuration,
/// selecting one of four creation paths (minimal, production-fast, lazy,
/// normal) exactly as `get_config()` resolves them at the time of the call.
///
/// Identical `(type, message, context)` triples are deduplicated: a second
/// call with the same triple reuses the first call's resolved
/// `source`/`stack`/`timestamp` rather than recomputing them, unless
/// [`ErrorOptions::force_stack_capture`] was set. The dedup cache holds at
/// most 1000 entries, evicting the oldest first.
#[track_caller]
pub fn create_error(error_type: impl Into<String>, message: impl Into<String>) -> TryError {
    create_error_with(error_type, message, ErrorOptions::new())
}

#[track_caller]
pub fn create_error_with(
    error_type: impl Into<String>,
    message: impl Into<String>,
    options: ErrorOptions,
) -> TryError {
    let config = get_config();
    create_error_with_config(&config, error_type, message, options)
}

/// Like [`create_error_with`], but against an explicit `config` rather than
/// the live, process-wide one — used by [`crate::config::Scope`] so a
/// scoped caller never reads or mutates global configuration state.
#[track_caller]
pub(crate) fn create_error_with_config(
    config: &ErrorConfig,
    error_type: impl Into<String>,
    message: impl Into<String>,
    options: ErrorOptions,
) -> TryError {
    let location = Location::caller();
    let error_type = intern::global().intern(&error_type.into()).to_string();
    let message = message.into();
    let built = build(config, error_type, message, options, location);
    finalize(config, built)
}

fn build(
    config: &ErrorConfig,
    error_type: String,
    message: String,
    options: ErrorOptions,
    location: &'static Location<'static>,
) -> TryError {
    if config.minimal_errors {
        return build_minimal(config, error_type, message, options);
    }
    if config.production && !config.capture_stack_trace && !config.include_source {
        return build_production(config, error_type, message, options);
    }
    if config.performance.error_creation.lazy_stack_trace && !config.production {
        return build_lazy(config, error_type, message, options, location);
    }
    build_normal(config, error_type, message, options, location)
}

fn build_minimal(config: &ErrorConfig, error_type: String, message: String, options: ErrorOptions) -> TryError {
    let timestamp = if config.skip_timestamp { 0 } else { now_ms() };
    construct(
        config,
        error_type,
        message,
        LazyField::eager("minimal".to_string()),
        LazyField::eager(timestamp),
        LazyField::eager(None),
        options.context,
        options.cause,
    )
}

fn build_production(config: &ErrorConfig, error_type: String, message: String, options: ErrorOptions) -> TryError {
    let timestamp = if config.skip_timestamp { 0 } else { now_ms() };
    let context_json = options
        .context
        .as_ref()
        .map(canonical_json_string)
        .unwrap_or_default();
    maybe_dedup(
        config,
        &error_type,
        &message,
        &context_json,
        options,
        "production".to_string(),
        None,
        timestamp,
    )
}

fn build_lazy(
    config: &ErrorConfig,
    error_type: String,
    message: String,
    options: ErrorOptions,
    location: &'static Location<'static>,
) -> TryError {
    let skip_timestamp = config.skip_timestamp;
    let source_cfg = config.source_location.clone();
    let type_for_stack = error_type.clone();
    let message_for_stack = message.clone();
    let capture_stack_trace = config.capture_stack_trace;
    let stack_limit = config.stack_trace_limit;

    let timestamp = LazyField::deferred(move || if skip_timestamp { 0 } else { now_ms() });
    let source = LazyField::deferred(move || format_location(location, &source_cfg));
    let stack = LazyField::deferred(move || {
        if capture_stack_trace {
            capture_stack(&type_for_stack, &message_for_stack, stack_limit)
        } else {
            None
        }
    });

    construct(config, error_type, message, source, timestamp, stack, options.context, options.cause)
}

fn build_normal(
    config: &ErrorConfig,
    error_type: String,
    message: String,
    options: ErrorOptions,
    location: &'static Location<'static>,
) -> TryError {
    let timestamp = if config.skip_timestamp { 0 } else { now_ms() };
    let context_json = options
        .context
        .as_ref()
        .map(canonical_json_string)
        .unwrap_or_default();
    let source = if config.include_source {
        format_location(location, &config.source_location)
    } else {
        "unknown".to_string()
    };
    let stack = if config.capture_stack_trace {
        capture_stack(&error_type, &message, config.stack_trace_limit)
    } else {
        None
    };
    maybe_dedup(config, &error_type, &message, &context_json, options, source, stack, timestamp)
}

#[allow(clippy::too_many_arguments)]
fn maybe_dedup(
    config: &ErrorConfig,
    error_type: &str,
    message: &str,
    context_json: &str,
    options: ErrorOptions,
    source: String,
    stack: Option<String>,
    timestamp: u64,
) -> TryError {
    let key = DedupCache::key(error_type, message, context_json);
    if !options.force_stack_capture {
        let mut cache = dedup_cache().lock().expect("dedup cache poisoned");
        if let Some(entry) = cache.get(&key) {
            return construct(
                config,
                error_type.to_string(),
                message.to_string(),
                LazyField::eager(entry.source.clone()),
                LazyField::eager(entry.timestamp),
                LazyField::eager(entry.stack.clone()),
                options.context,
                options.cause,
            );
        }
        cache.insert(
            key,
            Arc::new(CacheEntry {
                source: source.clone(),
                stack: stack.clone(),
                timestamp,
            }),
        );
    }
    construct(
        config,
        error_type.to_string(),
        message.to_string(),
        LazyField::eager(source),
        LazyField::eager(timestamp),
        LazyField::eager(stack),
        options.context,
        options.cause,
    )
}

/// Wraps an existing error as the `cause` of a new, typed `TryError`.
/// `message`, if `None`, is taken from `cause`'s `Display` implementation.
#[track_caller]
pub fn wrap_error(
    error_type: impl Into<String>,
    cause: Arc<dyn std::error::Error + Send + Sync>,
    message: Option<String>,
) -> TryError {
    let message = message.unwrap_or_else(|| cause.to_string());
    create_error_with(error_type, message, ErrorOptions::new().with_cause(cause))
}

/// Converts a `catch_unwind` panic payload into a [`TryError`], the analogue
/// of the spec's `from_thrown`: a string payload becomes a `"StringError"`,
/// anything else becomes an `"UnknownError"`.
#[track_caller]
pub fn from_thrown(payload: Box<dyn Any + Send>, context: Option<ContextValue>) -> TryError {
    let mut options = ErrorOptions::new();
    if let Some(ctx) = context {
        options = options.with_context(ctx);
    }
    if let Some(s) = payload.downcast_ref::<&str>() {
        return create_error_with("StringError", s.to_string(), options);
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return create_error_with("StringError", s.clone(), options);
    }
    create_error_with("UnknownError", "Unknown error occurred", options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{reset_config, ConfigPatch};

    #[test]
    fn create_error_carries_supplied_type_and_message() {
        reset_config();
        let err = create_error("ValidationError", "amount must be positive");
        assert_eq!(err.error_type(), "ValidationError");
        assert_eq!(err.message(), "amount must be positive");
    }

    #[test]
    fn minimal_path_skips_source_inference() {
        reset_config();
        let mut patch = ConfigPatch::new();
        patch.minimal_errors = Some(true);
        crate::config::configure(patch).unwrap();
        let err = create_error("Error", "boom");
        assert_eq!(err.source(), "minimal");
        assert!(err.stack().is_none());
        reset_config();
    }

    #[test]
    fn production_fast_path_has_no_stack() {
        reset_config();
        crate::config::configure("production").unwrap();
        let err = create_error("Error", "boom");
        assert_eq!(err.source(), "production");
        assert!(err.stack().is_none());
        reset_config();
    }

    #[test]
    fn lazy_path_defers_until_first_read() {
        reset_config();
        let mut patch = ConfigPatch::new();
        patch.performance = Some(crate::config::PerformancePatch {
            error_creation: Some(crate::config::ErrorCreationPerfPatch {
                lazy_stack_trace: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
        crate::config::configure(patch).unwrap();
        let err = create_error("Error", "boom");
        assert!(!err.lazy_fields_resolved());
        let _ = err.source();
        let _ = err.timestamp();
        let _ = err.stack();
        assert!(err.lazy_fields_resolved());
        reset_config();
    }

    #[test]
    fn dedup_cache_reuses_resolved_fields() {
        reset_config();
        let a = create_error("Error", "same message");
        let b = create_error("Error", "same message");
        assert_eq!(a.source(), b.source());
        assert_eq!(a.timestamp(), b.timestamp());
    }

    #[test]
    fn force_stack_capture_bypasses_dedup_reuse() {
        reset_config();
        let _a = create_error("Error", "bypass test");
        let options = ErrorOptions::new().force_stack_capture();
        let _b = create_error_with("Error", "bypass test", options);
    }

    #[test]
    fn from_thrown_string_payload_is_string_error() {
        let payload: Box<dyn Any + Send> = Box::new("boom".to_string());
        let err = from_thrown(payload, None);
        assert_eq!(err.error_type(), "StringError");
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn from_thrown_opaque_payload_is_unknown_error() {
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        let err = from_thrown(payload, None);
        assert_eq!(err.error_type(), "UnknownError");
    }

    #[test]
    fn with_context_wraps_non_map_values_to_preserve_the_mapping_invariant() {
        let options = ErrorOptions::new().with_context(crate::context::ContextValue::String("oops".to_string()));
        match options.context {
            Some(crate::context::ContextValue::Map(map)) => {
                assert!(matches!(map.get("value"), Some(crate::context::ContextValue::String(s)) if s == "oops"));
            }
            other => panic!("expected a wrapped map, got {other:?}"),
        }
    }

    #[test]
    fn object_pooling_path_reuses_slots_but_produces_correct_values() {
        reset_config();
        let mut patch = ConfigPatch::new();
        patch.performance = Some(crate::config::PerformancePatch {
            error_creation: Some(crate::config::ErrorCreationPerfPatch {
                object_pooling: Some(true),
                pool_size: Some(8),
                ..Default::default()
            }),
            ..Default::default()
        });
        crate::config::configure(patch).unwrap();

        let a = create_error("PoolError", "first");
        let b = create_error("PoolError", "second");
        assert_eq!(a.error_type(), "PoolError");
        assert_eq!(a.message(), "first");
        assert_eq!(b.message(), "second");
        assert!(error_slot_pool().stats().returns >= 2);
        reset_config();
    }

    #[test]
    fn dedup_cache_stays_bounded_past_fifteen_hundred_distinct_keys() {
        reset_config();
        for i in 0..1500 {
            let _ = create_error("BoundTest", format!("message-{i}"));
        }
        assert!(dedup_cache_len() <= 1000);
    }
}
