//! Tests for invalidation on node replacement, speculation failures and
//! recompilation against the speculation log, using the tree backend.

mod common;

use std::sync::Arc;

use common::*;
use tiercall::runtime::{
    ArtifactState, Runtime, RuntimeOptions, SlotState, SpeculationId, Value, ValueShape,
};
use tiercall::tree::{programs, TreeCompiler};

fn tree_runtime(options: RuntimeOptions) -> (Arc<Runtime>, Arc<RecordingListener>) {
    let listener = RecordingListener::new();
    let (fatal, _) = recording_fatal_handler();
    let runtime = Runtime::builder(Arc::new(TreeCompiler::new()))
        .options(options)
        .listener(listener.clone())
        .fatal_handler(fatal)
        .build();
    (runtime, listener)
}

#[test]
fn test_failed_add_speculation_deoptimizes_and_recompiles_generic() {
    let (runtime, listener) = tree_runtime(
        RuntimeOptions::default()
            .with_thresholds(5, 5)
            .synchronous(),
    );
    let sum = runtime
        .create_call_target(Arc::new(programs::sum_loop("sum")))
        .unwrap();

    for _ in 0..5 {
        assert_eq!(sum.call(&[Value::Long(3), Value::Long(1)]).unwrap(), Value::Long(3));
    }
    assert!(sum.is_valid());

    // The compiled integer add cannot handle a double step
    assert_eq!(
        sum.call(&[Value::Long(3), Value::Double(0.5)]).unwrap(),
        Value::Double(1.5)
    );
    assert_eq!(sum.artifact_state(), ArtifactState::Invalid);
    assert_eq!(sum.deoptimization_count(), 1);
    assert!(sum.speculation_log().is_failed(&SpeculationId::new("sum:add0:long")));

    let profile = sum.profile().counting().unwrap();
    assert_eq!(profile.node_replaced_count(), 1);
    assert!(profile.invalidation_count() >= 1);
    assert_eq!(listener.count(|e| matches!(e, Event::Invalidated(..))), 1);

    // Reprofiling with integers brings the target back, now without the
    // integer fast path
    for _ in 0..50 {
        sum.call(&[Value::Long(3), Value::Long(1)]).unwrap();
        if sum.is_valid() {
            break;
        }
    }
    assert!(sum.is_valid());

    let optimized = sum.optimized_call_count();
    assert_eq!(
        sum.call(&[Value::Long(2), Value::Double(0.25)]).unwrap(),
        Value::Double(0.5)
    );
    assert_eq!(sum.optimized_call_count(), optimized + 1);
    assert_eq!(sum.deoptimization_count(), 1);
    runtime.shutdown();
}

#[test]
fn test_argument_guard_failure_is_remembered() {
    let (runtime, _) = tree_runtime(RuntimeOptions::default().with_thresholds(3, 3).synchronous());
    let add = runtime.create_call_target(Arc::new(programs::add("add"))).unwrap();

    for i in 0..3 {
        add.call_direct(&[Value::Long(i), Value::Long(1)]).unwrap();
    }
    assert!(add.is_valid());
    let snapshot = add.profile().snapshot();
    assert_eq!(snapshot.argument_shape(1), SlotState::Stable(ValueShape::Long));

    // An indirect call does not profile arguments, so the entry guard is
    // what catches the double
    assert_eq!(
        add.call(&[Value::Long(1), Value::Double(1.5)]).unwrap(),
        Value::Double(2.5)
    );
    assert_eq!(add.deoptimization_count(), 1);
    let log = add.speculation_log();
    assert!(log.is_failed(&SpeculationId::new("add:arg1:long")));
    assert!(!log.is_failed(&SpeculationId::new("add:arg0:long")));

    for i in 0..50 {
        add.call_direct(&[Value::Long(i), Value::Long(1)]).unwrap();
        if add.is_valid() {
            break;
        }
    }
    assert!(add.is_valid());

    // Neither the guard nor the integer add is speculated again
    add.call(&[Value::Long(1), Value::Double(1.5)]).unwrap();
    assert_eq!(add.deoptimization_count(), 1);
    assert!(add.is_valid());
    runtime.shutdown();
}

#[test]
fn test_argument_profile_change_invalidates_before_dispatch() {
    let (runtime, _) = tree_runtime(RuntimeOptions::default().with_thresholds(3, 3).synchronous());
    let max = runtime.create_call_target(Arc::new(programs::max("max"))).unwrap();

    for i in 0..3 {
        max.call_direct(&[Value::Long(i), Value::Long(1)]).unwrap();
    }
    assert!(max.is_valid());

    assert_eq!(
        max.call_direct(&[Value::Long(1), Value::Double(2.5)]).unwrap(),
        Value::Double(2.5)
    );
    assert!(!max.is_valid());
    assert_eq!(max.deoptimization_count(), 0);
    assert_eq!(max.profile().snapshot().argument_shape(1), SlotState::Unstable);
    runtime.shutdown();
}

#[test]
fn test_node_replacement_without_code_only_reprofiles() {
    let (runtime, listener) = tree_runtime(RuntimeOptions::default().with_threshold(1000).synchronous());
    let add = runtime.create_call_target(Arc::new(programs::add("add"))).unwrap();

    add.call(&[Value::Long(1), Value::Long(1)]).unwrap();
    let profile = add.profile().counting().unwrap();
    let threshold = profile.call_and_loop_threshold();

    add.call(&[Value::Long(1), Value::Double(1.0)]).unwrap();

    assert_eq!(profile.node_replaced_count(), 1);
    assert_eq!(profile.invalidation_count(), 0);
    assert!(profile.call_and_loop_threshold() >= threshold);
    assert_eq!(add.artifact_state(), ArtifactState::Absent);
    assert_eq!(listener.count(|e| matches!(e, Event::Invalidated(..))), 0);
    assert_eq!(listener.count(|e| matches!(e, Event::Cancelled(..))), 0);
    runtime.shutdown();
}

#[test]
fn test_exceptions_from_optimized_code_are_classified() {
    let (runtime, _) = tree_runtime(RuntimeOptions::default().with_thresholds(3, 3).synchronous());
    let check = runtime
        .create_call_target(Arc::new(programs::check_non_negative("check")))
        .unwrap();

    for i in 0..3 {
        assert_eq!(check.call_direct(&[Value::Long(i)]).unwrap(), Value::Long(i));
    }
    assert!(check.is_valid());

    for i in 1..=20 {
        let err = check.call_direct(&[Value::Long(-i)]).unwrap_err();
        assert_eq!(err.category(), "RangeError");
        assert_eq!(err.message(), "negative input");
    }

    assert!(check.is_valid());
    let profile = check.profile().counting().unwrap();
    assert_eq!(profile.exceptions().count("RangeError"), 20);
    assert_eq!(
        profile.exceptions().monomorphic_category().as_deref(),
        Some("RangeError")
    );
    assert_eq!(check.profile().snapshot().hot_exceptions, vec!["RangeError".to_string()]);
    runtime.shutdown();
}

#[test]
fn test_oversized_unit_fails_permanently() {
    let listener = RecordingListener::new();
    let (fatal, _) = recording_fatal_handler();
    let runtime = Runtime::builder(Arc::new(TreeCompiler::new().with_max_nodes(1)))
        .options(RuntimeOptions::default().with_threshold(2).synchronous())
        .listener(listener.clone())
        .fatal_handler(fatal)
        .build();
    let sum = runtime
        .create_call_target(Arc::new(programs::sum_loop("sum")))
        .unwrap();

    for _ in 0..20 {
        sum.call(&[Value::Long(2), Value::Long(2)]).unwrap();
    }

    assert!(!sum.is_valid());
    assert!(sum.profile().counting().unwrap().is_failed());
    assert_eq!(
        listener.events()
            .iter()
            .filter(|e| matches!(e, Event::Failed(_, kind) if kind == "permanent-bailout"))
            .count(),
        1
    );
    runtime.shutdown();
}

#[test]
fn test_foreign_unit_is_unsupported() {
    let (runtime, listener) = tree_runtime(RuntimeOptions::default().with_threshold(2).synchronous());
    let target = runtime.create_call_target(SumUnit::new("foreign")).unwrap();

    target.compile().unwrap();

    assert!(!target.is_valid());
    assert_eq!(
        listener.events().last(),
        Some(&Event::Failed("foreign".to_string(), "unsupported".to_string()))
    );
    runtime.shutdown();
}
