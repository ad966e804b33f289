use std::sync::Arc;
use std::time::Duration;

use try_error::context::ContextValue;
use try_error::middleware::{enrich_context_middleware, logging_middleware, Pipeline};
use try_error::resilience::{CircuitBreaker, RateLimiter};
use try_error::{create_error, reset_config};

fn flaky_upstream_call(attempt: u32) -> Result<&'static str, try_error::TryError> {
    if attempt < 3 {
        Err(create_error("UpstreamError", "connection reset"))
    } else {
        Ok("payload")
    }
}

fn main() {
    reset_config();

    println!("--- Circuit breaker trips after repeated failures ---\n");
    let breaker = CircuitBreaker::new(3, Duration::from_millis(200));
    for attempt in 0..3 {
        let outcome = breaker.call(|| flaky_upstream_call(attempt));
        println!("attempt {attempt}: {:?}", outcome.map_err(|e| e.error_type().to_string()));
    }
    let tripped = breaker.call(|| flaky_upstream_call(99));
    println!(
        "breaker now: {:?} (is_open = {})",
        tripped.map_err(|e| e.error_type().to_string()),
        breaker.is_open()
    );

    println!("\n--- Rate limiter admits a bounded number of events per window ---\n");
    let limiter = RateLimiter::new(Duration::from_millis(100), 2);
    for i in 0..3 {
        match limiter.check() {
            Ok(()) => println!("event {i}: admitted"),
            Err(err) => println!("event {i}: rejected ({})", err.error_type()),
        }
    }

    println!("\n--- Middleware pipeline enriches and logs an error ---\n");
    let mut pipeline: Pipeline<&str> = Pipeline::new();
    pipeline.use_middleware(enrich_context_middleware(ContextValue::String(
        "request-id=abc123".to_string(),
    )));
    pipeline.use_middleware(logging_middleware(|result| {
        if let Err(err) = result {
            println!("[log] {} / {}", err.error_type(), err.message());
        }
    }));

    let outcome = pipeline.execute(Err(create_error("PipelineError", "boom")));
    match outcome {
        Ok(_) => println!("unreachable"),
        Err(err) => println!(
            "final error context present: {}",
            err.context().is_some()
        ),
    }

    let _ = Arc::new(limiter);
}
