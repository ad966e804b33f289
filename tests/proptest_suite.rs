//! Property-based and end-to-end tests over the public surface: the
//! invariants and boundary behaviors are property tests, the seed-suite
//! scenarios are plain `#[test]`s since each already names a single fixed
//! input shape.

use proptest::prelude::*;

use try_error::config::reset_config;
use try_error::context::{canonical_json_string, to_canonical_json, ContextValue};
use try_error::middleware::Pipeline;
use try_error::plugin::{Plugin, PluginError, PluginManager};
use try_error::resilience::CircuitBreaker;
use try_error::serialize::{are_try_errors_equal, clone_try_error, deserialize_try_error, is_try_error, serialize_try_error};
use try_error::result::try_sync_result;
use try_error::{create_error, retry_sync, try_all, try_any, try_chain, try_map, Result};

fn arb_type_tag() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9]{0,20}"
}

fn arb_message() -> impl Strategy<Value = String> {
    ".{0,64}"
}

proptest! {
    #[test]
    fn create_error_carries_supplied_type_and_message_for_any_input(
        error_type in arb_type_tag(),
        message in arb_message(),
    ) {
        reset_config();
        let err = create_error(error_type.clone(), message.clone());
        prop_assert_eq!(err.error_type(), error_type.as_str());
        prop_assert_eq!(err.message(), message.as_str());
        prop_assert!(is_try_error(&err));
    }

    #[test]
    fn round_trip_without_cause_is_equal_for_any_input(
        error_type in arb_type_tag(),
        message in arb_message(),
    ) {
        reset_config();
        let original = create_error(error_type, message);
        let restored = deserialize_try_error(&serialize_try_error(&original)).unwrap();
        prop_assert!(are_try_errors_equal(&original, &restored));
    }

    #[test]
    fn clone_is_idempotent_for_any_input(
        error_type in arb_type_tag(),
        message in arb_message(),
    ) {
        reset_config();
        let original = create_error(error_type, message);
        let cloned = clone_try_error(&original);
        prop_assert!(are_try_errors_equal(&original, &cloned));
    }

    #[test]
    fn result_is_ok_xor_err_for_any_input(value in any::<i32>(), fails in any::<bool>()) {
        reset_config();
        let result: Result<i32> = if fails { Err(create_error("Error", "boom")) } else { Ok(value) };
        prop_assert!(result.is_ok() ^ result.is_err());
    }

    #[test]
    fn try_all_preserves_order_for_any_input(values in prop::collection::vec(any::<i32>(), 0..8)) {
        reset_config();
        let results: Vec<Result<i32>> = values.iter().map(|v| Ok(*v)).collect();
        prop_assert_eq!(try_all(results).unwrap(), values);
    }
}

#[test]
fn try_map_and_try_chain_pass_through_error_unchanged() {
    reset_config();
    let err = create_error("Error", "boom");
    let mapped: Result<i32> = try_map(Err(clone_try_error(&err)), |v: i32| v + 1);
    assert_eq!(mapped.unwrap_err().message(), "boom");

    let chained: Result<i32> = try_chain(Err(clone_try_error(&err)), |v: i32| Ok(v + 1));
    assert_eq!(chained.unwrap_err().message(), "boom");
}

#[test]
fn try_all_empty_is_empty_and_try_any_empty_is_error() {
    let empty: Vec<Result<i32>> = vec![];
    assert_eq!(try_all(empty).unwrap(), Vec::<i32>::new());

    let empty_attempts: Vec<Box<dyn FnOnce() -> Result<i32>>> = vec![];
    assert!(try_any(empty_attempts).is_err());
}

#[test]
fn try_any_returns_first_success() {
    reset_config();
    let attempts: Vec<Box<dyn FnOnce() -> Result<i32>>> = vec![
        Box::new(|| Err(create_error("Error", "first"))),
        Box::new(|| Ok(7)),
    ];
    assert_eq!(try_any(attempts).unwrap(), 7);
}

#[test]
fn empty_middleware_pipeline_returns_initial_unchanged() {
    let pipeline: Pipeline<i32> = Pipeline::new();
    assert_eq!(pipeline.execute(Ok(5)).unwrap(), 5);
}

#[test]
fn cyclic_context_serializes_to_finite_string() {
    let cell = ContextValue::new_cell(ContextValue::Null);
    cell.set_cycle_to_self();
    let json = to_canonical_json(&cell);
    let s = canonical_json_string(&cell);
    assert_eq!(s, json.to_string());
    assert!(s.contains("[Circular]"));
    assert!(s.len() < 1000);
}

#[test]
fn backoff_never_overflows_up_to_31_attempts() {
    for attempt in 1..=31u32 {
        let delay = try_error::async_result::backoff_delay(
            attempt,
            std::time::Duration::from_millis(10),
            std::time::Duration::from_secs(30),
            2.0,
        );
        assert!(delay <= std::time::Duration::from_secs(30));
    }
}

// --- Seed-suite scenarios (spec §8) ---

fn parse_json(input: &str) -> Result<()> {
    if input == "invalid" {
        return Err(create_error("SyntaxError", "Unexpected token 'i', \"invalid\" is not valid JSON"));
    }
    Ok(())
}

#[test]
fn scenario_basic_sync_parse_error() {
    reset_config();
    let result = try_sync_result(|| parse_json("invalid"));
    let err = result.unwrap_err();
    assert_eq!(err.error_type(), "SyntaxError");
    assert!(err.message().starts_with("Unexpected token"));
}

#[cfg(feature = "tokio")]
#[tokio::test]
async fn scenario_async_timeout_message_mentions_duration() {
    use std::time::Duration;
    let result: Result<&str> = try_error::async_result::with_timeout(
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("x")
        },
        Duration::from_millis(100),
        None,
    )
    .await;
    let err = result.unwrap_err();
    assert!(err.message().contains("timed out after 100ms"));
}

#[test]
fn scenario_retry_recovers_after_two_failures_and_takes_at_least_30ms() {
    reset_config();
    let mut calls = 0;
    let start = std::time::Instant::now();
    let result = retry_sync(
        3,
        std::time::Duration::from_millis(10),
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
    assert!(start.elapsed() >= std::time::Duration::from_millis(10 + 20));
}

#[test]
fn scenario_circuit_breaker_opens_after_three_failures() {
    let breaker = CircuitBreaker::new(3, std::time::Duration::from_millis(60_000));
    for _ in 0..3 {
        let _ = breaker.call(|| Err::<(), _>(create_error("Error", "fail")));
    }
    let mut invoked = false;
    let result = breaker.call(|| {
        invoked = true;
        Ok(())
    });
    assert!(!invoked);
    assert_eq!(result.unwrap_err().error_type(), "CircuitBreakerOpen");
}

#[test]
fn scenario_dedup_reuses_resolved_fields_for_identical_triple() {
    reset_config();
    let a = create_error("DedupError", "same message");
    let b = create_error("DedupError", "same message");
    assert_eq!(a.source(), b.source());
    assert_eq!(a.timestamp(), b.timestamp());
    assert_eq!(a.stack(), b.stack());
}

#[test]
fn scenario_plugin_dependency_rules() {
    let manager = PluginManager::new();
    let install_b_first = manager.install(Plugin::new("B", "1.0").with_dependencies(vec!["A".to_string()]));
    assert!(matches!(install_b_first, Err(PluginError::DependencyMissing { .. })));

    manager.install(Plugin::new("A", "1.0")).unwrap();
    manager
        .install(Plugin::new("B", "1.0").with_dependencies(vec!["A".to_string()]))
        .unwrap();

    assert!(manager.uninstall("A").is_err());

    manager.uninstall("B").unwrap();
    manager.uninstall("A").unwrap();
}
