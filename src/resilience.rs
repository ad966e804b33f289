//! Circuit breaker, sliding-window rate limiter, and a bounded FIFO async
//! work queue — explicit, caller-owned resilience primitives.

use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::factory::create_error;
use crate::{Result, TryError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

/// A three-state circuit breaker: closed (normal), open (failing fast),
/// half-open (probing). Transition table is exactly the spec's:
/// closed -> open at `failure_threshold` consecutive failures; open ->
/// half-open once `reset_timeout` has elapsed since the last failure;
/// half-open -> closed on the next success, or back to open on the next
/// failure.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        CircuitBreaker {
            failure_threshold,
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
            }),
        }
    }

    fn pre_check(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == BreakerState::Open {
            let elapsed_enough = inner
                .last_failure_at
                .map(|t| t.elapsed() > self.reset_timeout)
                .unwrap_or(true);
            if elapsed_enough {
                inner.state = BreakerState::HalfOpen;
            } else {
                return Err(create_error("CircuitBreakerOpen", "circuit breaker is open"));
            }
        }
        Ok(())
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                }
            }
        }
    }

    /// Invokes `f` unless the breaker is open, in which case `f` is not
    /// called and a synthesized `CircuitBreakerOpen` error is returned.
    pub fn call<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.pre_check()?;
        match f() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().expect("circuit breaker mutex poisoned").state == BreakerState::Open
    }
}

/// A sliding-window rate limiter over error-creating events. Timestamps
/// outside the current window are purged lazily, on the next admission
/// check, rather than on a background timer.
pub struct RateLimiter {
    window: Duration,
    max_events: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_events: usize) -> Self {
        RateLimiter {
            window,
            max_events,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Records one event and returns `Ok(())` if it is admitted, or a
    /// synthesized `RateLimitExceeded` error if admitting it would exceed
    /// `max_events` within the current window.
    pub fn check(&self) -> Result<()> {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().expect("rate limiter mutex poisoned");
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() >= self.max_events {
            return Err(create_error("RateLimitExceeded", "rate limit exceeded"));
        }
        timestamps.push_back(now);
        Ok(())
    }

    pub fn current_count(&self) -> usize {
        self.timestamps.lock().expect("rate limiter mutex poisoned").len()
    }
}

/// A bounded FIFO work queue: submissions are admitted in order up to a
/// concurrency cap, and the queue preserves *admission* order, not
/// completion order.
pub struct AsyncQueue {
    #[cfg(feature = "tokio")]
    semaphore: tokio::sync::Semaphore,
    #[cfg(not(feature = "tokio"))]
    capacity: usize,
    in_flight: RwLock<usize>,
    admitted: Mutex<VecDeque<u64>>,
    next_id: Mutex<u64>,
}

impl AsyncQueue {
    pub fn new(concurrency: usize) -> Self {
        AsyncQueue {
            #[cfg(feature = "tokio")]
            semaphore: tokio::sync::Semaphore::new(concurrency),
            #[cfg(not(feature = "tokio"))]
            capacity: concurrency,
            in_flight: RwLock::new(0),
            admitted: Mutex::new(VecDeque::new()),
            next_id: Mutex::new(0),
        }
    }

    fn next_admission_id(&self) -> u64 {
        let mut next_id = self.next_id.lock().expect("queue id mutex poisoned");
        let id = *next_id;
        *next_id += 1;
        self.admitted.lock().expect("queue admission mutex poisoned").push_back(id);
        id
    }

    /// Number of operations currently admitted and running.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.read().expect("queue in_flight lock poisoned")
    }

    /// Admission order of submissions not yet completed, oldest first.
    pub fn pending_admission_order(&self) -> Vec<u64> {
        self.admitted.lock().expect("queue admission mutex poisoned").iter().copied().collect()
    }

    #[cfg(feature = "tokio")]
    pub async fn submit<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let id = self.next_admission_id();
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("queue semaphore closed");
        *self.in_flight.write().expect("queue in_flight lock poisoned") += 1;
        let result = fut.await;
        *self.in_flight.write().expect("queue in_flight lock poisoned") -= 1;
        self.admitted.lock().expect("queue admission mutex poisoned").retain(|x| *x != id);
        result
    }

    #[cfg(not(feature = "tokio"))]
    pub async fn submit<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let id = self.next_admission_id();
        loop {
            {
                let in_flight = self.in_flight.read().expect("queue in_flight lock poisoned");
                if *in_flight < self.capacity {
                    break;
                }
            }
            std::hint::spin_loop();
        }
        *self.in_flight.write().expect("queue in_flight lock poisoned") += 1;
        let result = fut.await;
        *self.in_flight.write().expect("queue in_flight lock poisoned") -= 1;
        self.admitted.lock().expect("queue admission mutex poisoned").retain(|x| *x != id);
        result
    }
}
