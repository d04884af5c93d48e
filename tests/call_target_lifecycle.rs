//! Tests for the call-target lifecycle: lazy initialization, profiling up to
//! the compile threshold, installation and dispatch to optimized code.

mod common;

use std::sync::Arc;

use common::*;
use tiercall::runtime::{ArtifactState, DebugValue, ProfileKind, RuntimeOptions, Value};

#[test]
fn test_first_call_runs_interpreted() {
    let runtime = runtime(StubBackend::succeeding(), sync_options(3));
    let unit = SumUnit::new("sum");
    let target = runtime.create_call_target(unit.clone()).unwrap();
    assert!(!target.is_initialized());
    assert_eq!(target.profile().kind(), ProfileKind::Void);

    assert_eq!(target.call(&longs(&[1])).unwrap(), Value::Long(1));

    assert!(target.is_initialized());
    assert_eq!(target.profile().kind(), ProfileKind::Default);
    assert_eq!(target.profile().counting().unwrap().call_count(), 1);
    assert_eq!(target.artifact_state(), ArtifactState::Absent);
    assert_eq!(target.interpreted_call_count(), 1);
    assert_eq!(unit.executions(), 1);
    runtime.shutdown();
}

#[test]
fn test_threshold_installs_and_dispatches_optimized() {
    let backend = StubBackend::succeeding();
    let runtime = runtime(backend.clone(), sync_options(3));
    let unit = SumUnit::new("sum");
    let target = runtime.create_call_target(unit.clone()).unwrap();

    target.call(&longs(&[1])).unwrap();
    target.call(&longs(&[2])).unwrap();
    assert!(!target.is_valid());

    // The third call crosses the threshold, compiles inline and already
    // runs the installed code
    assert_eq!(target.call(&longs(&[2, 3])).unwrap(), Value::Long(5));
    assert!(target.is_valid());
    assert_eq!(backend.compilations(), 1);
    assert!(!target.is_compiling());

    let interpreted = unit.executions();
    assert_eq!(target.call(&longs(&[4, 5])).unwrap(), Value::Long(9));
    assert_eq!(unit.executions(), interpreted);
    assert_eq!(target.optimized_call_count(), 2);

    // Calls that hit installed code are not counted
    assert_eq!(target.profile().counting().unwrap().call_count(), 3);
    runtime.shutdown();
}

#[test]
fn test_explicit_compile_before_any_call() {
    let backend = StubBackend::succeeding();
    let listener = RecordingListener::new();
    let runtime = tiercall::runtime::Runtime::builder(backend.clone())
        .options(sync_options(1000))
        .listener(listener.clone())
        .build();
    let target = runtime.create_call_target(SumUnit::new("eager")).unwrap();

    target.compile().unwrap();

    assert!(target.is_initialized());
    assert!(target.is_valid());
    assert_eq!(
        listener.events(),
        vec![
            Event::FirstExecution("eager".into()),
            Event::Queued("eager".into()),
            Event::Success("eager".into()),
        ]
    );
    runtime.shutdown();
}

#[test]
fn test_compilation_disabled_uses_void_profile() {
    let backend = StubBackend::succeeding();
    let runtime = runtime(backend.clone(), RuntimeOptions::interpreter_only());
    let target = runtime.create_call_target(SumUnit::new("cold")).unwrap();

    for i in 0..200 {
        assert_eq!(target.call(&longs(&[i, 1])).unwrap(), Value::Long(i + 1));
    }
    target.compile().unwrap();

    assert_eq!(target.profile().kind(), ProfileKind::Void);
    assert!(target.profile().counting().is_none());
    assert_eq!(backend.compilations(), 0);
    assert_eq!(target.artifact_state(), ArtifactState::Absent);
    runtime.shutdown();
}

#[test]
fn test_compile_only_filter() {
    let backend = StubBackend::succeeding();
    let options = RuntimeOptions {
        compile_only: vec!["hot".to_string()],
        ..sync_options(2)
    };
    let runtime = runtime(backend.clone(), options);
    let hot = runtime.create_call_target(SumUnit::new("hot-loop")).unwrap();
    let cold = runtime.create_call_target(SumUnit::new("setup")).unwrap();

    for _ in 0..10 {
        hot.call(&longs(&[1])).unwrap();
        cold.call(&longs(&[1])).unwrap();
    }

    assert!(hot.is_valid());
    assert_eq!(cold.profile().kind(), ProfileKind::Void);
    assert!(!cold.is_valid());
    assert_eq!(backend.compiled_names(), vec!["hot-loop".to_string()]);
    runtime.shutdown();
}

#[test]
fn test_tracing_profile_reaches_same_decision() {
    let backend = StubBackend::succeeding();
    let runtime = runtime(backend.clone(), sync_options(3).with_call_target_profiling());
    let target = runtime.create_call_target(SumUnit::new("traced")).unwrap();

    for _ in 0..3 {
        target.call_direct(&longs(&[1, 2])).unwrap();
    }

    assert_eq!(target.profile().kind(), ProfileKind::Tracing);
    assert!(target.is_valid());
    assert_eq!(backend.compilations(), 1);
    runtime.shutdown();
}

#[test]
fn test_inlined_calls_bypass_the_boundary() {
    let backend = StubBackend::succeeding();
    let runtime = runtime(backend.clone(), sync_options(2));
    let unit = SumUnit::new("inlined");
    let target = runtime.create_call_target(unit.clone()).unwrap();

    for _ in 0..10 {
        assert_eq!(target.call_inlined(&longs(&[3, 4])).unwrap(), Value::Long(7));
    }

    let profile = target.profile().counting().unwrap();
    assert_eq!(profile.inlined_call_count(), 10);
    assert_eq!(profile.call_count(), 0);
    assert_eq!(backend.compilations(), 0);
    assert_eq!(unit.executions(), 10);
    runtime.shutdown();
}

#[test]
fn test_application_exceptions_pass_through_unchanged() {
    let runtime = runtime(StubBackend::succeeding(), sync_options(2));
    let target = runtime.create_call_target(SumUnit::new("strict")).unwrap();

    let err = target.call(&[Value::Bool(true)]).unwrap_err();
    assert_eq!(err.category(), "TypeError");

    for _ in 0..5 {
        target.call(&longs(&[1])).unwrap();
    }
    assert!(target.is_valid());

    let err = target.call_direct(&[Value::Nil]).unwrap_err();
    assert_eq!(err.category(), "TypeError");
    let profile = target.profile().counting().unwrap();
    assert_eq!(profile.exceptions().count("TypeError"), 1);
    runtime.shutdown();
}

#[test]
fn test_debug_properties_describe_target() {
    let runtime = runtime(StubBackend::succeeding(), sync_options(2));
    let target = runtime.create_call_target(SumUnit::new("described")).unwrap();
    target.increment_known_call_sites();
    target.increment_known_call_sites();
    target.decrement_known_call_sites();
    for _ in 0..3 {
        target.call(&longs(&[1])).unwrap();
    }

    let props = target.debug_properties();
    assert_eq!(props["artifact"], DebugValue::from("valid"));
    assert_eq!(props["known_call_sites"].as_count(), Some(1));
    assert_eq!(props["profile"], DebugValue::from("default"));
    assert_eq!(props["split"].as_bool(), Some(false));
    assert!(props.contains_key("code_size"));

    let text = tiercall::runtime::debug::to_toml(&props).unwrap();
    assert!(text.contains("name = \"described\""));
    runtime.shutdown();
}

#[test]
fn test_release_removes_target_from_arena() {
    let runtime = runtime(StubBackend::succeeding(), sync_options(2));
    let target = runtime.create_call_target(SumUnit::new("released")).unwrap();
    let id = target.id();
    assert_eq!(runtime.target_count(), 1);
    assert!(Arc::ptr_eq(&runtime.target(id).unwrap(), &target));

    let released = runtime.release(id).unwrap();
    assert!(Arc::ptr_eq(&released, &target));
    assert!(runtime.target(id).is_none());
    assert_eq!(runtime.target_count(), 0);

    // A released target keeps working for whoever still holds it
    assert_eq!(target.call(&longs(&[2])).unwrap(), Value::Long(2));
    runtime.shutdown();
}
