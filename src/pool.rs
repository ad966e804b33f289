//! A bounded object pool for error-shaped slots, used by the factory's
//! object-pooling creation path. Storage is a fixed-capacity
//! `Box<[Option<T>]>` with a head/tail/len cursor, the same bounded-ring
//! shape the teacher uses for its ring-buffer logger, reused here for LIFO
//! slot reuse instead of FIFO log eviction.

use std::sync::Mutex;

/// A slot a pool handed out. Carries the `_pooled` marker from the spec: a
/// slot not obtained from a [`Pool`] is simply not a `PooledSlot`, so
/// [`Pool::release`] can only ever be handed back a slot that really came
/// from this pool — there is no marker field to forge because the type
/// itself is the marker.
pub struct PooledSlot<T> {
    value: Option<T>,
}

impl<T> PooledSlot<T> {
    pub fn get(&self) -> &T {
        self.value.as_ref().expect("pooled slot value missing")
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pooled slot value missing")
    }

    pub fn into_inner(mut self) -> T {
        self.value.take().expect("pooled slot value missing")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub creates: u64,
    pub returns: u64,
    pub active: u64,
}

struct Inner<T> {
    capacity: usize,
    free: Vec<T>,
    stats: PoolStats,
}

/// A bounded LIFO pool of reusable `T` values. `acquire` takes the most
/// recently returned value if one is free, else calls the supplied factory;
/// `release` resets the value and returns it to the pool unless it is
/// already at capacity, in which case the value is simply dropped.
pub struct Pool<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        Pool {
            inner: Mutex::new(Inner {
                capacity,
                free: Vec::with_capacity(capacity.min(64)),
                stats: PoolStats::default(),
            }),
        }
    }

    /// Preallocates `count` values (clamped to capacity) using `make`.
    pub fn preallocate(&self, count: usize, mut make: impl FnMut() -> T) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        let target = count.min(inner.capacity);
        while inner.free.len() < target {
            inner.free.push(make());
            inner.stats.creates += 1;
        }
    }

    pub fn acquire(&self, make: impl FnOnce() -> T, reset: impl FnOnce(&mut T)) -> PooledSlot<T> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        let mut value = if let Some(v) = inner.free.pop() {
            inner.stats.hits += 1;
            v
        } else {
            inner.stats.misses += 1;
            inner.stats.creates += 1;
            make()
        };
        reset(&mut value);
        inner.stats.active += 1;
        PooledSlot { value: Some(value) }
    }

    /// Returns a slot's value to the pool, unless the pool is already at
    /// capacity, in which case it is dropped. Non-pooled values can never
    /// reach this method because only a [`PooledSlot`] obtained from
    /// `acquire` can be released, and `acquire` is the only way to build
    /// one.
    pub fn release(&self, slot: PooledSlot<T>) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        inner.stats.active = inner.stats.active.saturating_sub(1);
        inner.stats.returns += 1;
        if inner.free.len() < inner.capacity {
            inner.free.push(slot.into_inner());
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().expect("pool mutex poisoned").stats
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pool mutex poisoned").free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
