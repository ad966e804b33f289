//! A memoizing lazy field, used by the error factory's lazy creation path
//! (`performance.errorCreation.lazyStackTrace`) to defer source-location and
//! stack computation until the field is first read, while still being
//! observably identical to an eagerly-computed field afterwards.

use std::fmt;
use std::sync::{Mutex, OnceLock};

type Thunk<T> = Box<dyn FnOnce() -> T + Send>;

pub enum LazyField<T> {
    Eager(T),
    Deferred(OnceLock<T>, Mutex<Option<Thunk<T>>>),
}

impl<T> LazyField<T> {
    pub fn eager(value: T) -> Self {
        LazyField::Eager(value)
    }

    pub fn deferred<F>(thunk: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        LazyField::Deferred(OnceLock::new(), Mutex::new(Some(Box::new(thunk))))
    }

    /// Forces and returns a reference to the value, computing it on first
    /// access if this field is deferred. Safe to call from multiple threads;
    /// the thunk runs at most once.
    pub fn get(&self) -> &T {
        match self {
            LazyField::Eager(v) => v,
            LazyField::Deferred(cell, thunk) => cell.get_or_init(|| {
                let taken = thunk.lock().expect("lazy field mutex poisoned").take();
                taken.expect("lazy field thunk already consumed")()
            }),
        }
    }

    /// True if the value has already been computed (or was eager to begin
    /// with). Never forces computation.
    pub fn is_resolved(&self) -> bool {
        match self {
            LazyField::Eager(_) => true,
            LazyField::Deferred(cell, _) => cell.get().is_some(),
        }
    }
}

impl<T: Clone> LazyField<T> {
    pub fn into_inner(self) -> T {
        match self {
            LazyField::Eager(v) => v,
            LazyField::Deferred(cell, thunk) => match cell.into_inner() {
                Some(v) => v,
                None => {
                    let taken = thunk.into_inner().expect("lazy field mutex poisoned");
                    taken.expect("lazy field thunk already consumed")()
                }
            },
        }
    }
}

impl<T: Clone> Clone for LazyField<T> {
    fn clone(&self) -> Self {
        LazyField::Eager(self.get().clone())
    }
}

impl<T: fmt::Debug + Clone> fmt::Debug for LazyField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.get().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn deferred_runs_thunk_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let field = LazyField::deferred(move || {
            c.fetch_add(1, Ordering::SeqCst);
            42u32
        });
        assert_eq!(*field.get(), 42);
        assert_eq!(*field.get(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eager_is_resolved_immediately() {
        let field = LazyField::eager(7u32);
        assert!(field.is_resolved());
        assert_eq!(*field.get(), 7);
    }

    #[test]
    fn deferred_is_unresolved_until_read() {
        let field: LazyField<u32> = LazyField::deferred(|| 1);
        assert!(!field.is_resolved());
        field.get();
        assert!(field.is_resolved());
    }
}
