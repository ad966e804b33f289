//! String interning for error `type`/`message` values.
//!
//! Short, frequently repeated strings (error type tags, common messages)
//! are kept behind strong `Arc<str>` references so repeated creation is a
//! clone of a refcount, not a fresh allocation. Longer or rarer strings are
//! interned behind `Weak<str>` so they can be reclaimed once nothing else
//! references them, rather than accumulating forever in a process-wide
//! table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// The length, inclusive, at or under which a string is considered "common"
/// and kept as a strong reference rather than a reclaimable weak one.
const COMMON_LEN_THRESHOLD: usize = 32;

enum Slot {
    Strong(Arc<str>),
    Weak(Weak<str>),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InternStats {
    pub hits: u64,
    pub misses: u64,
    pub live_strong: u64,
    pub live_weak: u64,
}

struct Inner {
    table: HashMap<String, Slot>,
    stats: InternStats,
}

/// A process-wide (or scope-local, if constructed directly rather than via
/// [`global`]) string interning table.
pub struct InternPool {
    inner: Mutex<Inner>,
}

impl InternPool {
    pub fn new() -> Self {
        InternPool {
            inner: Mutex::new(Inner {
                table: HashMap::new(),
                stats: InternStats::default(),
            }),
        }
    }

    /// Interns `s`, returning a cheaply-clonable `Arc<str>`. Strings at or
    /// under [`COMMON_LEN_THRESHOLD`] bytes are kept alive by the pool
    /// itself (strong); longer strings are only kept alive by callers still
    /// holding a clone of the returned `Arc` (weak table entry).
    pub fn intern(&self, s: &str) -> Arc<str> {
        let mut inner = self.inner.lock().expect("intern pool mutex poisoned");
        if let Some(slot) = inner.table.get(s) {
            match slot {
                Slot::Strong(arc) => {
                    inner.stats.hits += 1;
                    return arc.clone();
                }
                Slot::Weak(weak) => {
                    if let Some(arc) = weak.upgrade() {
                        inner.stats.hits += 1;
                        return arc;
                    }
                }
            }
        }
        inner.stats.misses += 1;
        let arc: Arc<str> = Arc::from(s);
        if s.len() <= COMMON_LEN_THRESHOLD {
            inner.table.insert(s.to_string(), Slot::Strong(arc.clone()));
            inner.stats.live_strong += 1;
        } else {
            inner
                .table
                .insert(s.to_string(), Slot::Weak(Arc::downgrade(&arc)));
            inner.stats.live_weak += 1;
        }
        arc
    }

    /// Drops table entries whose weak reference no longer upgrades.
    /// Exposed for hosts that want to reclaim memory deterministically
    /// rather than waiting for the next `intern` miss on the same key.
    pub fn sweep(&self) {
        let mut inner = self.inner.lock().expect("intern pool mutex poisoned");
        inner.table.retain(|_, slot| match slot {
            Slot::Strong(_) => true,
            Slot::Weak(weak) => weak.strong_count() > 0,
        });
    }

    pub fn stats(&self) -> InternStats {
        self.inner.lock().expect("intern pool mutex poisoned").stats
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("intern pool mutex poisoned").table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InternPool {
    fn default() -> Self {
        InternPool::new()
    }
}

static GLOBAL: std::sync::OnceLock<InternPool> = std::sync::OnceLock::new();

/// The process-wide intern pool the factory uses for error type tags and
/// common messages.
pub fn global() -> &'static InternPool {
    GLOBAL.get_or_init(InternPool::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_short_string_is_same_allocation() {
        let pool = InternPool::new();
        let a = pool.intern("ValidationError");
        let b = pool.intern("ValidationError");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn long_string_is_reclaimed_once_unreferenced() {
        let pool = InternPool::new();
        let long = "x".repeat(200);
        {
            let _a = pool.intern(&long);
            assert_eq!(pool.len(), 1);
        }
        pool.sweep();
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn short_string_survives_sweep_with_no_holders() {
        let pool = InternPool::new();
        pool.intern("Error");
        pool.sweep();
        assert_eq!(pool.len(), 1);
    }
}
