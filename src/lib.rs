//! Branded, contextual error values with amortized-zero-cost creation, a
//! `Result`-style operation wrapper, sync/async combinators, and a small set
//! of resilience primitives built around a process-wide, versioned
//! configuration layer.
//!
//! The error value at the center of the crate is [`TryError`]: it carries a
//! private brand field that cannot be named or constructed outside this
//! crate, so any value that type-checks as a `TryError` is, by construction,
//! one this crate produced. There is no separate "is this real" check to
//! forge around.

pub mod async_result;
pub mod config;
pub mod context;
pub mod convenience;
pub mod events;
pub mod factory;
pub mod intern;
mod lazy;
pub mod middleware;
pub mod plugin;
pub mod pool;
pub mod resilience;
pub mod result;
pub mod serialize;

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use context::ContextValue;
use lazy::LazyField;

pub use config::{
    configure, create_env_config, create_scope, get_config, reset_config, with_error_service,
    ConfigPatch, ErrorConfig,
};
pub use context::ContextValue as Context;
pub use factory::{create_error, from_thrown, wrap_error, ErrorOptions};
pub use result::{
    retry_sync, try_all, try_any, try_chain, try_map, try_sync, try_sync_tuple, with_fallback,
};
pub use serialize::{
    are_try_errors_equal, clone_try_error, correlate_errors, deserialize_try_error, diff_errors,
    get_error_fingerprint, get_error_summary, group_errors, is_try_error, serialize_try_error,
};

/// Zero-sized, private token. The only way to obtain one is
/// `Brand::mint()`, callable only from inside this crate, which is what
/// makes [`TryError`] unforgeable from the outside: nothing outside this
/// crate can construct a `TryError` at all, branded or not, because every
/// constructor path runs through code that holds the private field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Brand(());

impl Brand {
    pub(crate) fn mint() -> Self {
        Brand(())
    }
}

/// A branded, contextual error value.
///
/// Construct one with [`create_error`], [`wrap_error`], or [`from_thrown`] —
/// never directly; the fields are private so the only way to have a
/// `TryError` is to have gotten it from this crate.
pub struct TryError {
    brand: Brand,
    error_type: String,
    message: String,
    source: LazyField<String>,
    timestamp: LazyField<u64>,
    stack: LazyField<Option<String>>,
    context: Option<ContextValue>,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl TryError {
    pub(crate) fn new(
        error_type: impl Into<String>,
        message: impl Into<String>,
        source: LazyField<String>,
        timestamp: LazyField<u64>,
        stack: LazyField<Option<String>>,
        context: Option<ContextValue>,
        cause: Option<Arc<dyn StdError + Send + Sync>>,
    ) -> Self {
        TryError {
            brand: Brand::mint(),
            error_type: error_type.into(),
            message: message.into(),
            source,
            timestamp,
            stack,
            context,
            cause,
        }
    }

    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// One of the sentinel values described in the data model ("minimal",
    /// "production", "unknown", or a formatted source location), resolved
    /// lazily if the error was created on the lazy path.
    pub fn source(&self) -> &str {
        self.source.get()
    }

    /// Milliseconds since the Unix epoch, or `0` if timestamp capture was
    /// suppressed (`skipTimestamp`).
    pub fn timestamp(&self) -> u64 {
        *self.timestamp.get()
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.get().as_deref()
    }

    pub fn context(&self) -> Option<&ContextValue> {
        self.context.as_ref()
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync)> {
        self.cause.as_deref()
    }

    /// Whether every lazily-deferred field has already been resolved. Useful
    /// for tests asserting that the lazy creation path really did defer
    /// work, and resolved it on first read.
    pub fn lazy_fields_resolved(&self) -> bool {
        self.source.is_resolved() && self.timestamp.is_resolved() && self.stack.is_resolved()
    }

    /// A borrowed, allocation-conscious structured view for host-supplied
    /// logging sinks. The crate never writes to a sink itself; callers wire
    /// this into whatever they use (see `SPEC_FULL.md` §3.2).
    pub fn log_view(&self) -> ErrorLogView<'_> {
        ErrorLogView { error: self }
    }

    /// Returns a clone of `self` with `context` merged in (replacing any
    /// overlapping keys), used by `crate::middleware::enrich_context_middleware`
    /// and any caller that wants to attach additional diagnostic context to
    /// an error it did not create. Never changes the brand.
    pub fn with_additional_context(&self, context: ContextValue) -> TryError {
        let merged = match (&self.context, context) {
            (Some(ContextValue::Map(existing)), ContextValue::Map(addition)) => {
                let mut merged = existing.clone();
                merged.extend(addition);
                ContextValue::Map(merged)
            }
            (_, new_context) => new_context,
        };
        TryError {
            brand: self.brand,
            error_type: self.error_type.clone(),
            message: self.message.clone(),
            source: self.source.clone(),
            timestamp: self.timestamp.clone(),
            stack: self.stack.clone(),
            context: Some(merged),
            cause: self.cause.clone(),
        }
    }

    pub(crate) fn cause_arc(&self) -> Option<Arc<dyn StdError + Send + Sync>> {
        self.cause.clone()
    }
}

impl Clone for TryError {
    fn clone(&self) -> Self {
        TryError {
            brand: self.brand,
            error_type: self.error_type.clone(),
            message: self.message.clone(),
            source: self.source.clone(),
            timestamp: self.timestamp.clone(),
            stack: self.stack.clone(),
            context: self.context.clone(),
            cause: self.cause.clone(),
        }
    }
}

impl fmt::Debug for TryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryError")
            .field("error_type", &self.error_type)
            .field("message", &self.message)
            .field("source", self.source.get())
            .field("timestamp", self.timestamp.get())
            .field("stack", self.stack.get())
            .field("context", &self.context.is_some())
            .field("cause", &self.cause.is_some())
            .finish()
    }
}

impl fmt::Display for TryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl StdError for TryError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

/// A borrowed structured view over a [`TryError`], for host logging sinks.
pub struct ErrorLogView<'a> {
    error: &'a TryError,
}

impl<'a> ErrorLogView<'a> {
    pub fn error_type(&self) -> &str {
        self.error.error_type()
    }

    pub fn message(&self) -> &str {
        self.error.message()
    }

    pub fn source(&self) -> &str {
        self.error.source()
    }

    pub fn timestamp(&self) -> u64 {
        self.error.timestamp()
    }

    pub fn context_json(&self) -> Option<String> {
        self.error.context().map(context::canonical_json_string)
    }

    /// Writes a single structured log line, without allocating beyond what
    /// the destination `fmt::Write` implementation itself allocates.
    pub fn write_to(&self, out: &mut impl fmt::Write) -> fmt::Result {
        write!(
            out,
            "type={} message={:?} source={} timestamp={}",
            self.error_type(),
            self.message(),
            self.source(),
            self.timestamp()
        )?;
        if let Some(ctx) = self.context_json() {
            write!(out, " context={}", ctx)?;
        }
        Ok(())
    }
}

/// A fallible operation's outcome: `Ok(T)` on success, `Err(TryError)` (by
/// default) otherwise. A plain alias over [`std::result::Result`] — Rust's
/// success case is already unwrapped and allocation-free, so there is
/// nothing further to translate from the source data model's "Result".
pub type Result<T, E = TryError> = std::result::Result<T, E>;

/// A pair-adapter alternative to [`Result`]: at most one of the two fields
/// is populated. Exists for hosts that prefer a tuple-style return over
/// `Result` at an API boundary.
#[derive(Clone, Debug)]
pub struct Tuple<T, E = TryError>(Option<T>, Option<E>);

impl<T, E> Tuple<T, E> {
    pub fn ok(value: T) -> Self {
        Tuple(Some(value), None)
    }

    pub fn err(error: E) -> Self {
        Tuple(None, Some(error))
    }

    pub fn is_ok(&self) -> bool {
        self.0.is_some()
    }

    pub fn is_err(&self) -> bool {
        self.1.is_some()
    }

    pub fn value(&self) -> Option<&T> {
        self.0.as_ref()
    }

    pub fn error(&self) -> Option<&E> {
        self.1.as_ref()
    }

    pub fn into_parts(self) -> (Option<T>, Option<E>) {
        (self.0, self.1)
    }
}

impl<T, E> From<std::result::Result<T, E>> for Tuple<T, E> {
    fn from(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(v) => Tuple::ok(v),
            Err(e) => Tuple::err(e),
        }
    }
}
