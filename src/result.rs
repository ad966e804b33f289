//! Synchronous `Result` wrapper and combinators.

use std::panic::AssertUnwindSafe;

use crate::factory::from_thrown;
use crate::{Result, TryError};

/// Runs `f`, catching a panic and converting it into a [`TryError`] via
/// [`from_thrown`] rather than letting it unwind past this call. This is
/// the Rust analogue of the source spec's "thrown value" capture: Rust has
/// no untyped `throw`, so a panic is the closest equivalent of "something
/// was thrown that isn't already a `Result`."
pub fn try_sync<T>(f: impl FnOnce() -> T) -> Result<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => Err(from_thrown(payload, None)),
    }
}

/// Like [`try_sync`], but for a closure that already returns a `Result`:
/// only a panic (not a returned `Err`) is converted; a returned `Err`
/// passes through unchanged.
pub fn try_sync_result<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(from_thrown(payload, None)),
    }
}

/// [`try_sync`] returning a [`crate::Tuple`] instead of a [`Result`].
pub fn try_sync_tuple<T>(f: impl FnOnce() -> T) -> crate::Tuple<T> {
    try_sync(f).into()
}

/// Applies `f` to a success value, catching (and converting) any panic `f`
/// raises. An existing error passes through untouched.
pub fn try_map<T, U>(result: Result<T>, f: impl FnOnce(T) -> U) -> Result<U> {
    match result {
        Ok(value) => try_sync(|| f(value)),
        Err(err) => Err(err),
    }
}

/// Monadic bind: `f` itself returns a `Result` and is *not* wrapped in panic
/// capture — unlike [`try_map`], a chainer is expected to already be a
/// well-behaved fallible operation.
pub fn try_chain<T, U>(result: Result<T>, f: impl FnOnce(T) -> Result<U>) -> Result<U> {
    match result {
        Ok(value) => f(value),
        Err(err) => Err(err),
    }
}

/// Collects every success value in input order, short-circuiting on the
/// first error.
pub fn try_all<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    for result in results {
        values.push(result?);
    }
    Ok(values)
}

/// Returns the first success among `attempts`, run in order; if every
/// attempt fails, returns the last error, or a synthesized error if
/// `attempts` was empty.
pub fn try_any<T>(attempts: Vec<Box<dyn FnOnce() -> Result<T>>>) -> Result<T> {
    if attempts.is_empty() {
        return Err(crate::factory::create_error(
            "AggregateError",
            "all attempts failed",
        ));
    }
    let mut last_error = None;
    for attempt in attempts {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| crate::factory::create_error("AggregateError", "all attempts failed")))
}

/// Retries `f` synchronously up to `attempts` times, sleeping `delay`
/// between attempts and consulting `should_retry` with the failing error
/// and the attempt number before retrying again. The sleep is a real
/// blocking `std::thread::sleep`, not a busy loop — see `DESIGN.md`'s notes
/// on this spec's retry semantics.
pub fn retry_sync<T>(
    attempts: u32,
    delay: std::time::Duration,
    mut f: impl FnMut() -> Result<T>,
    mut should_retry: impl FnMut(&TryError, u32) -> bool,
) -> Result<T> {
    let mut last_error = None;
    for attempt in 1..=attempts.max(1) {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retry = attempt < attempts && should_retry(&err, attempt);
                last_error = Some(err);
                if !retry {
                    break;
                }
                std::thread::sleep(delay);
            }
        }
    }
    Err(last_error.expect("retry_sync always runs at least once"))
}

/// Runs `primary`; on failure, if `should_fallback` (default: always) agrees,
/// runs and returns `fallback`'s result instead.
pub fn with_fallback<T>(
    primary: impl FnOnce() -> Result<T>,
    fallback: impl FnOnce() -> Result<T>,
    should_fallback: impl FnOnce(&TryError) -> bool,
) -> Result<T> {
    match primary() {
        Ok(value) => Ok(value),
        Err(err) => {
            if should_fallback(&err) {
                fallback()
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_error;

    #[test]
    fn try_sync_catches_panic_as_string_error() {
        let result: Result<i32> = try_sync(|| panic!("boom"));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().error_type(), "StringError");
    }

    #[test]
    fn try_map_passes_through_error() {
        let err = create_error("Error", "boom");
        let result: Result<i32> = Err(err);
        let mapped = try_map(result, |v: i32| v + 1);
        assert!(mapped.is_err());
    }

    #[test]
    fn try_chain_passes_through_error_without_calling_f() {
        let err = create_error("Error", "boom");
        let result: Result<i32> = Err(err);
        let mut called = false;
        let chained = try_chain(result, |v| {
            called = true;
            Ok(v + 1)
        });
        assert!(!called);
        assert!(chained.is_err());
    }

    #[test]
    fn try_all_preserves_order_or_short_circuits() {
        let ok: Vec<Result<i32>> = vec![Ok(1), Ok(2), Ok(3)];
        assert_eq!(try_all(ok).unwrap(), vec![1, 2, 3]);

        let with_error: Vec<Result<i32>> = vec![Ok(1), Err(create_error("Error", "boom")), Ok(3)];
        assert!(try_all(with_error).is_err());
    }

    #[test]
    fn try_any_empty_is_error() {
        let attempts: Vec<Box<dyn FnOnce() -> Result<i32>>> = vec![];
        assert!(try_any(attempts).is_err());
    }

    #[test]
    fn try_any_returns_first_success() {
        let attempts: Vec<Box<dyn FnOnce() -> Result<i32>>> = vec![
            Box::new(|| Err(create_error("Error", "first"))),
            Box::new(|| Ok(2)),
            Box::new(|| panic!("should not run")),
        ];
        assert_eq!(try_any(attempts).unwrap(), 2);
    }

    #[test]
    fn retry_sync_recovers_after_two_failures() {
        let mut calls = 0;
        let result = retry_sync(
            3,
            std::time::Duration::from_millis(1),
            || {
                calls += 1;
                if calls < 3 {
                    Err(create_error("Error", "transient"))
                } else {
                    Ok("ok")
                }
            },
            |_, _| true,
        );
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls, 3);
    }

    #[test]
    fn with_fallback_runs_fallback_on_error() {
        let result = with_fallback(
            || Err::<i32, _>(create_error("Error", "boom")),
            || Ok(99),
            |_| true,
        );
        assert_eq!(result.unwrap(), 99);
    }
}
