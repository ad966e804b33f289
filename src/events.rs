//! A bounded, ordered event emitter for factory/lifecycle notifications
//! (`error:created`, `error:transformed`, ...).
//!
//! Rust has no implicit microtask queue the way the source runtime does, so
//! "drains in microtask, not synchronously with creation" is translated
//! literally: [`emit`] only enqueues, and a caller (a host event loop, a
//! test, or a `tokio` task) must call [`drain`] to actually invoke
//! listeners. This keeps emission order observable and explicit rather than
//! inventing an implicit scheduler this crate does not own.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::TryError;

pub type Listener = std::sync::Arc<dyn Fn(&TryError) + Send + Sync>;

const QUEUE_CAPACITY: usize = 1000;

struct QueuedEvent {
    name: String,
    error: TryError,
}

struct State {
    queue: VecDeque<QueuedEvent>,
    dropped: u64,
    by_event: HashMap<String, Vec<(u64, Listener)>>,
    global: Vec<(u64, Listener)>,
}

impl State {
    fn new() -> Self {
        State {
            queue: VecDeque::new(),
            dropped: 0,
            by_event: HashMap::new(),
            global: Vec::new(),
        }
    }
}

static STATE: std::sync::OnceLock<Mutex<State>> = std::sync::OnceLock::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn state() -> &'static Mutex<State> {
    STATE.get_or_init(|| Mutex::new(State::new()))
}

/// A handle returned by [`on`]/[`on_any`], usable with [`off`] to
/// deregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Enqueues `error` under `event_name`. If the queue is already at capacity
/// (1000), the oldest queued event is dropped to make room — emission never
/// blocks or errors.
pub fn emit(event_name: &str, error: &TryError) {
    let mut state = state().lock().expect("event state poisoned");
    if state.queue.len() >= QUEUE_CAPACITY {
        state.queue.pop_front();
        state.dropped += 1;
    }
    state.queue.push_back(QueuedEvent {
        name: event_name.to_string(),
        error: error.clone(),
    });
}

/// Registers a listener for a specific event name.
pub fn on(event_name: &str, listener: impl Fn(&TryError) + Send + Sync + 'static) -> ListenerId {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    state()
        .lock()
        .expect("event state poisoned")
        .by_event
        .entry(event_name.to_string())
        .or_default()
        .push((id, std::sync::Arc::new(listener)));
    ListenerId(id)
}

/// Registers a listener invoked for every event, regardless of name.
pub fn on_any(listener: impl Fn(&TryError) + Send + Sync + 'static) -> ListenerId {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    state()
        .lock()
        .expect("event state poisoned")
        .global
        .push((id, std::sync::Arc::new(listener)));
    ListenerId(id)
}

/// Removes a previously registered listener, if it is still registered.
pub fn off(id: ListenerId) {
    let mut state = state().lock().expect("event state poisoned");
    for listeners in state.by_event.values_mut() {
        listeners.retain(|(lid, _)| *lid != id.0);
    }
    state.global.retain(|(lid, _)| *lid != id.0);
}

/// Drains every currently-queued event in FIFO (emission) order, invoking
/// matching per-event and global listeners. A listener that panics is
/// caught so it cannot take down the drain loop or affect other listeners;
/// the panic is reported to stderr. Returns the number of events processed.
pub fn drain() -> usize {
    let events: Vec<QueuedEvent> = {
        let mut state = state().lock().expect("event state poisoned");
        state.queue.drain(..).collect()
    };
    let mut processed = 0;
    for event in &events {
        let (specific, global): (Vec<Listener>, Vec<Listener>) = {
            let state = state().lock().expect("event state poisoned");
            let specific = state
                .by_event
                .get(&event.name)
                .map(|v| v.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default();
            let global = state.global.iter().map(|(_, l)| l.clone()).collect();
            (specific, global)
        };
        for listener in specific.iter().chain(global.iter()) {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(&event.error)));
            if result.is_err() {
                eprintln!("try_error: event listener panicked while handling {}", event.name);
            }
        }
        processed += 1;
    }
    processed
}

/// Number of events currently queued, not yet drained.
pub fn pending_count() -> usize {
    state().lock().expect("event state poisoned").queue.len()
}

/// Number of events dropped so far because the queue was at capacity.
pub fn dropped_count() -> u64 {
    state().lock().expect("event state poisoned").dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_error;
    use std::sync::atomic::{AtomicUsize, Ordering as AtOrdering};
    use std::sync::Arc;

    fn clear_state() {
        let mut state = state().lock().unwrap();
        state.queue.clear();
        state.by_event.clear();
        state.global.clear();
        state.dropped = 0;
    }

    #[test]
    fn listener_receives_emitted_event_after_drain() {
        clear_state();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        on("error:created", move |_| {
            c.fetch_add(1, AtOrdering::SeqCst);
        });
        let err = create_error("Error", "boom");
        emit("error:created", &err);
        assert_eq!(count.load(AtOrdering::SeqCst), 0);
        drain();
        assert_eq!(count.load(AtOrdering::SeqCst), 1);
    }

    #[test]
    fn queue_drops_oldest_past_capacity() {
        clear_state();
        let err = create_error("Error", "boom");
        for _ in 0..(QUEUE_CAPACITY + 10) {
            emit("error:created", &err);
        }
        assert_eq!(pending_count(), QUEUE_CAPACITY);
        assert_eq!(dropped_count(), 10);
        drain();
    }

    #[test]
    fn panicking_listener_does_not_stop_other_listeners() {
        clear_state();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        on_any(|_| panic!("listener boom"));
        on_any(move |_| {
            c.fetch_add(1, AtOrdering::SeqCst);
        });
        let err = create_error("Error", "boom");
        emit("error:created", &err);
        drain();
        assert_eq!(count.load(AtOrdering::SeqCst), 1);
    }

    #[test]
    fn off_removes_listener() {
        clear_state();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = on("error:created", move |_| {
            c.fetch_add(1, AtOrdering::SeqCst);
        });
        off(id);
        let err = create_error("Error", "boom");
        emit("error:created", &err);
        drain();
        assert_eq!(count.load(AtOrdering::SeqCst), 0);
    }
}
