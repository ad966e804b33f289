//! A synchronous middleware pipeline: `(result, next) -> result`, walked in
//! insertion order, where each middleware decides whether to delegate to
//! `next` or short-circuit by returning without calling it.

use std::sync::Arc;

use crate::context::ContextValue;
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::{Result, TryError};

/// The remainder of the pipeline, as a single callable continuation. A
/// middleware that never calls `next.run(..)` short-circuits everything
/// after it.
pub struct Next<T>(Box<dyn FnOnce(Result<T>) -> Result<T>>);

impl<T> Next<T> {
    pub fn new(f: impl FnOnce(Result<T>) -> Result<T> + 'static) -> Self {
        Next(Box::new(f))
    }

    pub fn run(self, result: Result<T>) -> Result<T> {
        (self.0)(result)
    }
}

pub type Middleware<T> = Arc<dyn Fn(Result<T>, Next<T>) -> Result<T> + Send + Sync>;

/// An ordered stack of middlewares, executed front-to-back.
pub struct Pipeline<T> {
    middlewares: Vec<Middleware<T>>,
}

impl<T: 'static> Pipeline<T> {
    pub fn new() -> Self {
        Pipeline { middlewares: Vec::new() }
    }

    pub fn use_middleware(&mut self, middleware: Middleware<T>) {
        self.middlewares.push(middleware);
    }

    /// Runs `initial` through every middleware in insertion order. With no
    /// middlewares registered, returns `initial` unchanged.
    pub fn execute(&self, initial: Result<T>) -> Result<T> {
        let terminal: Next<T> = Next::new(|r| r);
        let chain = self.middlewares.iter().rev().fold(terminal, |acc, mw| {
            let mw = mw.clone();
            Next::new(move |r| mw(r, acc))
        });
        chain.run(initial)
    }
}

impl<T: 'static> Default for Pipeline<T> {
    fn default() -> Self {
        Pipeline::new()
    }
}

/// Combines two middlewares into one equivalent to running `a` then `b` in
/// sequence.
pub fn compose<T: 'static>(a: Middleware<T>, b: Middleware<T>) -> Middleware<T> {
    Arc::new(move |result, next| {
        let b = b.clone();
        a(result, Next::new(move |r| b(r, next)))
    })
}

/// Calls `log` with a reference to the current result, then delegates.
pub fn logging_middleware<T: 'static>(log: impl Fn(&Result<T>) + Send + Sync + 'static) -> Middleware<T> {
    Arc::new(move |result, next| {
        log(&result);
        next.run(result)
    })
}

/// Maps a success value through `f`, leaving an error untouched, then
/// delegates.
pub fn transform_middleware<T: 'static>(f: impl Fn(T) -> T + Send + Sync + 'static) -> Middleware<T> {
    Arc::new(move |result, next| next.run(result.map(&f)))
}

/// Merges `context` into an error result before delegating; leaves a
/// success value untouched.
pub fn enrich_context_middleware<T: 'static>(context: ContextValue) -> Middleware<T> {
    Arc::new(move |result, next| {
        let enriched = result.map_err(|err| err.with_additional_context(context.clone()));
        next.run(enriched)
    })
}

/// Only delegates to `next` if the current error's type matches
/// `predicate`; otherwise passes the result through unchanged without
/// running the rest of the pipeline. A success value always delegates.
pub fn filter_by_type_middleware<T: 'static>(
    predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
) -> Middleware<T> {
    Arc::new(move |result, next| match &result {
        Err(err) if !predicate(err.error_type()) => result,
        _ => next.run(result),
    })
}

/// Re-invokes `retry_op` up to `attempts` times while the current result is
/// an error, before delegating the final outcome to `next`.
pub fn retry_middleware<T: 'static>(
    attempts: u32,
    retry_op: Arc<dyn Fn() -> Result<T> + Send + Sync>,
) -> Middleware<T> {
    Arc::new(move |result, next| {
        let mut current = result;
        let mut tries = 0;
        while current.is_err() && tries < attempts {
            current = retry_op();
            tries += 1;
        }
        next.run(current)
    })
}

/// Guards the rest of the pipeline with a [`CircuitBreaker`]: when the
/// breaker is open, `next` is never invoked and a `CircuitBreakerOpen`
/// error is returned instead.
pub fn circuit_breaker_middleware<T: 'static>(breaker: Arc<CircuitBreaker>) -> Middleware<T> {
    Arc::new(move |result, next| breaker.call(move || next.run(result)))
}

/// Guards the rest of the pipeline with a [`RateLimiter`]: once the limit
/// is exceeded, `next` is never invoked.
pub fn rate_limit_middleware<T: 'static>(limiter: Arc<RateLimiter>) -> Middleware<T> {
    Arc::new(move |result, next| {
        limiter.check()?;
        next.run(result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn empty_pipeline_returns_initial_unchanged() {
        let pipeline: Pipeline<i32> = Pipeline::new();
        assert_eq!(pipeline.execute(Ok(5)).unwrap(), 5);
    }

    #[test]
    fn middlewares_run_in_insertion_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline: Pipeline<i32> = Pipeline::new();
        for i in 0..3 {
            let order = order.clone();
            pipeline.use_middleware(Arc::new(move |result, next| {
                order.lock().unwrap().push(i);
                next.run(result)
            }));
        }
        pipeline.execute(Ok(1)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn middleware_can_short_circuit() {
        let ran_second = Arc::new(AtomicUsize::new(0));
        let flag = ran_second.clone();
        let mut pipeline: Pipeline<i32> = Pipeline::new();
        pipeline.use_middleware(Arc::new(|result, _next| result));
        pipeline.use_middleware(Arc::new(move |result, next| {
            flag.fetch_add(1, Ordering::SeqCst);
            next.run(result)
        }));
        pipeline.execute(Ok(1)).unwrap();
        assert_eq!(ran_second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn filter_by_type_passes_through_non_matching_errors() {
        let mut pipeline: Pipeline<i32> = Pipeline::new();
        pipeline.use_middleware(filter_by_type_middleware(|t| t == "Retryable"));
        pipeline.use_middleware(Arc::new(|_, next| next.run(Ok(42))));
        let result = pipeline.execute(Err(create_error("OtherError", "boom")));
        assert_eq!(result.unwrap_err().error_type(), "OtherError");
    }

    #[test]
    fn circuit_breaker_middleware_short_circuits_when_open() {
        let breaker = Arc::new(CircuitBreaker::new(1, std::time::Duration::from_secs(60)));
        let _ = breaker.call(|| Err::<(), _>(create_error("Error", "fail")));
        let mut pipeline: Pipeline<i32> = Pipeline::new();
        pipeline.use_middleware(circuit_breaker_middleware(breaker));
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        pipeline.use_middleware(Arc::new(move |result, next| {
            flag.fetch_add(1, Ordering::SeqCst);
            next.run(result)
        }));
        let result = pipeline.execute(Ok(1));
        assert_eq!(result.unwrap_err().error_type(), "CircuitBreakerOpen");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
