//! Async `Result` wrapper, combinators, timeout, and retry-with-backoff.
//!
//! Timer-dependent operations ([`with_timeout`], [`retry`]) need a runtime
//! to sleep on, so they are feature-gated: `tokio` is used when the
//! `tokio` feature is enabled (preferred, matching the teacher's primary
//! optional dependency), falling back to `async-std` when only that
//! feature is enabled. The timer-agnostic combinators below need only
//! `futures` and compile unconditionally.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::{join_all, select_all};
use futures::FutureExt;

use crate::factory::create_error;
use crate::factory::from_thrown;
use crate::{Result, TryError};

/// Runs `fut` to completion, converting a panic inside it into a
/// [`TryError`] the same way [`crate::result::try_sync`] does for
/// synchronous code.
pub async fn try_async<T, Fut>(fut: Fut) -> Result<T>
where
    Fut: std::future::Future<Output = T>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Ok(value),
        Err(payload) => Err(from_thrown(payload, None)),
    }
}

/// [`try_async`] for a future that already yields a `Result`.
pub async fn try_async_result<T, Fut>(fut: Fut) -> Result<T>
where
    Fut: std::future::Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(from_thrown(payload, None)),
    }
}

/// [`try_async`] returning a [`crate::Tuple`].
pub async fn try_async_tuple<T, Fut>(fut: Fut) -> crate::Tuple<T>
where
    Fut: std::future::Future<Output = T>,
{
    try_async(fut).await.into()
}

/// Applies `f` to a success value produced by `fut`, catching any panic `f`
/// raises.
pub async fn try_map_async<T, U, Fut>(fut: Fut, f: impl FnOnce(T) -> U) -> Result<U>
where
    Fut: std::future::Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => try_async(async move { f(value) }).await,
        Err(err) => Err(err),
    }
}

/// Monadic bind for an async chainer. Unlike [`try_map_async`], `f`'s
/// output future is not wrapped in panic capture.
pub async fn try_chain_async<T, U, Fut, FutB, F>(fut: Fut, f: F) -> Result<U>
where
    Fut: std::future::Future<Output = Result<T>>,
    FutB: std::future::Future<Output = Result<U>>,
    F: FnOnce(T) -> FutB,
{
    match fut.await {
        Ok(value) => f(value).await,
        Err(err) => Err(err),
    }
}

/// Awaits every future to completion (settle-all semantics — no
/// short-circuiting), then collects successes in input order or the first
/// error encountered in input order.
pub async fn try_all_async<T>(
    futures_list: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Result<T>> + Send>>>,
) -> Result<Vec<T>> {
    let results = join_all(futures_list).await;
    let mut values = Vec::with_capacity(results.len());
    for result in results {
        values.push(result?);
    }
    Ok(values)
}

/// Races every future concurrently; returns the first success. If every
/// future fails (or the input was empty), returns the last observed error,
/// or a synthesized `AggregateError` if the input was empty. No ordering is
/// promised among the losing futures.
pub async fn try_any_async<T: Send + 'static>(
    futures_list: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Result<T>> + Send>>>,
) -> Result<T> {
    if futures_list.is_empty() {
        return Err(create_error("AggregateError", "all attempts failed"));
    }
    let mut remaining = futures_list;
    let mut last_error = None;
    while !remaining.is_empty() {
        let (result, _index, rest) = select_all(remaining).await;
        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_error = Some(err);
                remaining = rest;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| create_error("AggregateError", "all attempts failed")))
}

/// Tries each future in order, awaiting one fully before starting the next;
/// short-circuits on the first success, so later attempts never start.
pub async fn try_any_sequential<T>(
    attempts: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Result<T>> + Send>>>,
) -> Result<T> {
    if attempts.is_empty() {
        return Err(create_error("AggregateError", "all attempts failed"));
    }
    let mut last_error = None;
    for attempt in attempts {
        match attempt.await {
            Ok(value) => return Ok(value),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| create_error("AggregateError", "all attempts failed")))
}

/// Computes `min(base * factor^(n-1), max)` using floating point so the
/// exponent can never overflow an integer type, even for `attempts` up to
/// 2^31: `powi` saturates to `f64::INFINITY` for large exponents rather
/// than panicking, and the subsequent `min` clamps back into range.
pub fn backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration, backoff_factor: f64) -> Duration {
    let n = attempt.max(1) as i32 - 1;
    let scaled = base_delay.as_secs_f64() * backoff_factor.powi(n);
    let clamped = scaled.min(max_delay.as_secs_f64()).max(0.0);
    Duration::from_secs_f64(clamped)
}

#[cfg(feature = "tokio")]
mod timers {
    use super::*;

    /// Races `fut` against a `duration` timer. On timeout, returns a
    /// `TimeoutError`; `fut` is **not** cancelled — it is spawned onto the
    /// runtime so it keeps running to completion (its result discarded) even
    /// after this function returns. Preserving that behavior, rather than
    /// adding cancellation, is a deliberate choice — see `DESIGN.md`.
    pub async fn with_timeout<T>(
        fut: impl std::future::Future<Output = Result<T>> + Send + 'static,
        duration: Duration,
        message: Option<String>,
    ) -> Result<T>
    where
        T: Send + 'static,
    {
        let handle = tokio::spawn(fut);
        match tokio::time::timeout(duration, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(_join_error)) => Err(create_error("Error", "operation panicked")),
            Err(_elapsed) => {
                let message = message.unwrap_or_else(|| {
                    format!("operation timed out after {}ms", duration.as_millis())
                });
                Err(create_error("TimeoutError", message))
            }
        }
    }

    /// Retries an async operation with exponential backoff, consulting
    /// `should_retry` before each wait.
    pub async fn retry<T, Fut>(
        attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        mut f: impl FnMut() -> Fut,
        mut should_retry: impl FnMut(&TryError, u32) -> bool,
    ) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;
        for attempt in 1..=attempts.max(1) {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let retry = attempt < attempts && should_retry(&err, attempt);
                    last_error = Some(err);
                    if !retry {
                        break;
                    }
                    tokio::time::sleep(backoff_delay(attempt, base_delay, max_delay, backoff_factor)).await;
                }
            }
        }
        Err(last_error.expect("retry always runs at least once"))
    }
}

#[cfg(all(feature = "async-std", not(feature = "tokio")))]
mod timers {
    use super::*;

    pub async fn with_timeout<T>(
        fut: impl std::future::Future<Output = Result<T>> + Send + 'static,
        duration: Duration,
        message: Option<String>,
    ) -> Result<T>
    where
        T: Send + 'static,
    {
        let handle = async_std::task::spawn(fut);
        futures::select! {
            result = handle.fuse() => result,
            _ = async_std::task::sleep(duration).fuse() => {
                let message = message.unwrap_or_else(|| {
                    format!("operation timed out after {}ms", duration.as_millis())
                });
                Err(create_error("TimeoutError", message))
            }
        }
    }

    pub async fn retry<T, Fut>(
        attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        mut f: impl FnMut() -> Fut,
        mut should_retry: impl FnMut(&TryError, u32) -> bool,
    ) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;
        for attempt in 1..=attempts.max(1) {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let retry = attempt < attempts && should_retry(&err, attempt);
                    last_error = Some(err);
                    if !retry {
                        break;
                    }
                    async_std::task::sleep(backoff_delay(attempt, base_delay, max_delay, backoff_factor)).await;
                }
            }
        }
        Err(last_error.expect("retry always runs at least once"))
    }
}

#[cfg(any(feature = "tokio", feature = "async-std"))]
pub use timers::{retry, with_timeout};

#[cfg(all(test, feature = "tokio"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_async_catches_panic() {
        let result: Result<i32> = try_async(async { panic!("boom") }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn try_all_async_preserves_order() {
        let futs: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32>> + Send>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async { Ok(2) }),
            Box::pin(async { Ok(3) }),
        ];
        let result = try_all_async(futs).await.unwrap();
        assert_eq!(result, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn try_any_sequential_short_circuits_on_first_success() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        let second_ran = Arc::new(AtomicBool::new(false));
        let flag = second_ran.clone();
        let attempts: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32>> + Send>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(2)
            }),
        ];
        let result = try_any_sequential(attempts).await.unwrap();
        assert_eq!(result, 1);
        assert!(!second_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn with_timeout_returns_timeout_error_and_keeps_message() {
        let result: Result<i32> = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(1)
            },
            Duration::from_millis(20),
            None,
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.error_type(), "TimeoutError");
        assert!(err.message().contains("timed out after 20ms"));
    }

    #[tokio::test]
    async fn retry_recovers_after_two_failures() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);
        let result = retry(
            3,
            Duration::from_millis(1),
            Duration::from_millis(10),
            2.0,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(create_error("Error", "transient"))
                    } else {
                        Ok("ok")
                    }
                }
            },
            |_, _| true,
        )
        .await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[test]
    fn backoff_delay_never_overflows_for_many_attempts() {
        let delay = backoff_delay(31, Duration::from_millis(1000), Duration::from_millis(30_000), 2.0);
        assert_eq!(delay, Duration::from_millis(30_000));
        let delay = backoff_delay(1_000_000, Duration::from_millis(1000), Duration::from_millis(30_000), 2.0);
        assert_eq!(delay, Duration::from_millis(30_000));
    }
}
