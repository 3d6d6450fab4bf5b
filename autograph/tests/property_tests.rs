//! Invariants of conversion, fallback and the registry.

mod common;

use autograph::domain::{classify_expr, classify_value, ConstEnv};
use autograph::ir::build::*;
use autograph::prelude::*;
use autograph_trace::engine::PrimitiveKind;
use autograph_trace::session::{SessionError, TracingSession};
use common::{run_with_fault, FaultStage};

fn convert(f: Function, config: AutographConfig) -> Result<std::rc::Rc<ConvertedFunction>, AutographError> {
    let ag = Autograph::new(config);
    let h = ag.register(f);
    ag.convert(h)
}

// ==================== Uninitialized use ====================

#[test]
fn test_branch_local_temporary_is_not_an_error() {
    let f = Function::new(
        "f",
        vec![Param::new("x")],
        vec![
            assign("res", int(0)),
            if_(
                gt(var("x"), int(0)),
                vec![assign("tmp", mul(var("x"), int(2))), assign("res", add(var("tmp"), int(1)))],
            ),
            ret(var("res")),
        ],
    );
    let converted = convert(f, AutographConfig::strict()).unwrap();
    let unit = converted.units()[0];
    assert_eq!(unit.carried_names(), vec!["res".to_string()]);
    assert_eq!(unit.temporaries, vec!["tmp".to_string()]);
}

#[test]
fn test_read_after_zero_trip_loop_is_an_error() {
    let f = Function::new(
        "f",
        vec![Param::new("n")],
        vec![for_("i", range(var("n")), vec![assign("last", var("i"))]), ret(var("last"))],
    );
    let err = convert(f, AutographConfig::default()).unwrap_err();
    let errors = err.analysis().unwrap();
    assert!(errors.mentions("last"));
    assert!(!errors.mentions("i"));
}

// ==================== Carried types ====================

#[test]
fn test_unrepresentable_and_wrong_type_are_distinguished() {
    let text = Function::new(
        "f",
        vec![],
        vec![
            assign("s", string("a")),
            for_("i", range(int(3)), vec![assign("s", add(var("s"), string("b")))]),
            ret(var("s")),
        ],
    );
    let err = convert(text.clone(), AutographConfig::strict()).unwrap_err();
    assert!(matches!(
        err.analysis().unwrap().errors()[0].kind,
        AnalysisErrorKind::UnrepresentableType { ref name, ref type_name } if name == "s" && type_name == "str"
    ));

    let widened = Function::new(
        "g",
        vec![],
        vec![
            assign("x", int(0)),
            for_("i", range(int(3)), vec![assign("x", float(1.5))]),
            ret(var("x")),
        ],
    );
    let err = convert(widened.clone(), AutographConfig::strict()).unwrap_err();
    assert!(matches!(
        err.analysis().unwrap().errors()[0].kind,
        AnalysisErrorKind::WrongType { ref name, .. } if name == "x"
    ));

    // Without strict conversion both are left to the primitive
    assert!(convert(text, AutographConfig::default()).is_ok());
    assert!(convert(widened, AutographConfig::default()).is_ok());
}

#[test]
fn test_dynamic_initial_value_changing_type_is_rejected_when_strict() {
    let for_loop = Function::new(
        "f",
        vec![Param::new("x")],
        vec![
            for_("i", range(int(3)), vec![assign("x", add(var("x"), float(0.5)))]),
            ret(var("x")),
        ],
    );
    let while_loop = Function::new(
        "g",
        vec![Param::new("x")],
        vec![
            while_(lt(var("x"), int(3)), vec![assign("x", add(var("x"), float(0.5)))]),
            ret(var("x")),
        ],
    );
    for function in [for_loop.clone(), while_loop] {
        // Unannotated parameter: nothing is known until the value arrives
        assert!(convert(function.clone(), AutographConfig::strict()).is_ok());

        let err = common::run(function, AutographConfig::strict(), vec![Argument::Dynamic(Value::Int(1))])
            .unwrap_err();
        let errors = err.analysis().expect("carried type change must be an analysis error");
        assert!(matches!(
            errors.errors()[0].kind,
            AnalysisErrorKind::WrongType { ref name, .. } if name == "x"
        ));
        assert!(err.to_string().contains("'x' was initialized with the wrong type"));
    }

    // Without strict conversion the primitive fails before binding and the loop runs eagerly
    let out = common::run(for_loop, AutographConfig::default(), vec![Argument::Dynamic(Value::Int(1))]).unwrap();
    assert_eq!(out.value, Value::Float(2.5));
    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(out.diagnostics[0].kind, DiagnosticKind::PrimitiveFallback(FailureStage::PreBind));
}

#[test]
fn test_ranges_near_integer_bounds() {
    let upward = Function::new(
        "f",
        vec![],
        vec![
            assign("acc", int(0)),
            for_("i", range3(int(1), int(10), int(i64::MAX)), vec![add_assign("acc", var("i"))]),
            ret(var("acc")),
        ],
    );
    let downward = Function::new(
        "g",
        vec![],
        vec![
            assign("acc", int(0)),
            for_(
                "i",
                range3(int(i64::MAX - 1), int(i64::MIN), int(i64::MIN)),
                vec![add_assign("acc", var("i"))],
            ),
            ret(var("acc")),
        ],
    );
    for (function, expected) in [(upward, 1), (downward, i64::MAX - 3)] {
        let ag = Autograph::new(AutographConfig::strict());
        let h = ag.register(function);
        assert_eq!(ag.call(h, vec![]).unwrap(), Value::Int(expected));
        let out = ag.run(h, vec![]).unwrap();
        assert_eq!(out.value, Value::Int(expected));
        assert!(out.diagnostics.is_empty());
    }
}

// ==================== Branch completeness ====================

#[test]
fn test_branch_completeness() {
    let complete = Function::new(
        "f",
        vec![Param::new("x")],
        vec![
            if_chain(
                vec![
                    (lt(var("x"), int(0)), vec![assign("sign", int(-1))]),
                    (gt(var("x"), int(0)), vec![assign("sign", int(1))]),
                ],
                Some(vec![assign("sign", int(0))]),
            ),
            ret(var("sign")),
        ],
    );
    assert!(convert(complete, AutographConfig::strict()).is_ok());

    let incomplete = Function::new(
        "f",
        vec![Param::new("x")],
        vec![
            if_chain(
                vec![
                    (lt(var("x"), int(0)), vec![assign("sign", int(-1))]),
                    (gt(var("x"), int(0)), vec![pass()]),
                ],
                Some(vec![assign("sign", int(0))]),
            ),
            ret(var("sign")),
        ],
    );
    let err = convert(incomplete, AutographConfig::default()).unwrap_err();
    assert!(err.analysis().unwrap().mentions("sign"));
}

#[test]
fn test_elif_chain_selects_through_nested_conds() {
    let f = Function::new(
        "sign",
        vec![Param::new("x")],
        vec![
            if_chain(
                vec![
                    (lt(var("x"), int(0)), vec![assign("s", int(-1))]),
                    (gt(var("x"), int(0)), vec![assign("s", int(1))]),
                ],
                Some(vec![assign("s", int(0))]),
            ),
            ret(var("s")),
        ],
    );
    let ag = Autograph::new(AutographConfig::default());
    let h = ag.register(f);
    for (x, expected) in [(-4, -1), (0, 0), (9, 1)] {
        let out = ag.run(h, vec![Argument::Dynamic(Value::Int(x))]).unwrap();
        assert_eq!(out.value, Value::Int(expected));
    }
}

// ==================== Domain classification ====================

#[test]
fn test_domain_classification_is_idempotent() {
    let source = list(vec![int(0), int(4), int(5)]);
    let target = name("x");
    let first = classify_expr(&source, &target, &ConstEnv::new()).unwrap();
    let second = classify_expr(&source, &target, &ConstEnv::new()).unwrap();
    assert_eq!(first, second);

    let value = Value::List(vec![Value::Int(0), Value::Int(4), Value::Int(5)]);
    assert_eq!(classify_value(&value, &target), classify_value(&value, &target));
    assert_eq!(classify_value(&value, &target).kind, first.kind);
}

// ==================== Fallback transparency ====================

fn loops_and_branches() -> Function {
    Function::new(
        "mixed",
        vec![Param::new("x")],
        vec![
            assign("acc", int(0)),
            while_(lt(var("acc"), int(20)), vec![add_assign("acc", int(5))]),
            for_("i", range(int(4)), vec![add_assign("acc", var("i"))]),
            if_else(
                gt(var("x"), int(0)),
                vec![assign("acc", add(var("acc"), var("x")))],
                vec![assign("acc", sub(var("acc"), int(1)))],
            ),
            ret(var("acc")),
        ],
    )
}

#[test]
fn test_fallback_does_not_change_results() {
    let ag = Autograph::new(AutographConfig::default());
    let h = ag.register(loops_and_branches());
    for primitive in [PrimitiveKind::ForLoop, PrimitiveKind::WhileLoop] {
        for stage in [FaultStage::PreBind, FaultStage::PostBind] {
            let eager = ag.call(h, vec![Value::Int(3)]).unwrap();
            let out = run_with_fault(&ag, h, vec![Argument::Static(Value::Int(3))], primitive, stage).unwrap();
            assert_eq!(out.value, eager, "{} failing at {:?}", primitive, stage);
            assert_eq!(out.fired, 1);
            assert_eq!(out.diagnostics.len(), 1);
        }
    }
}

#[test]
fn test_strict_conversion_propagates_primitive_failure() {
    let ag = Autograph::new(AutographConfig::strict());
    let h = ag.register(loops_and_branches());
    let err = run_with_fault(
        &ag,
        h,
        vec![Argument::Static(Value::Int(3))],
        PrimitiveKind::ForLoop,
        FaultStage::PreBind,
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "TypeError: injected pre-bind fault");
}

// ==================== Registry ====================

#[test]
fn test_repeated_conversion_does_not_duplicate_diagnostics() {
    let f = Function::new(
        "f",
        vec![],
        vec![
            assign("n", int(0)),
            for_("c", string("abc"), vec![add_assign("n", int(1))]),
            ret(var("n")),
        ],
    );
    let ag = Autograph::new(AutographConfig::default());
    let h = ag.register(f);
    ag.convert(h).unwrap();
    let source = ag.converted_source(h).unwrap();
    ag.convert(h).unwrap();
    assert_eq!(ag.conversion_diagnostics(h).len(), 1);
    assert_eq!(ag.converted_source(h).unwrap(), source);

    let out = ag.run(h, vec![]).unwrap();
    assert_eq!(out.value, Value::Int(3));
    assert_eq!(out.diagnostics.len(), 1);
}

// ==================== Session ====================

#[test]
fn test_session_exclusivity() {
    assert!(!TracingSession::is_active());
    {
        let _session = TracingSession::enter().unwrap();
        assert!(TracingSession::is_active());
        assert_eq!(TracingSession::enter().unwrap_err(), SessionError::Reentry);
    }
    assert!(!TracingSession::is_active());

    let ag = Autograph::new(AutographConfig::default());
    let h = ag.register(loops_and_branches());
    let session = TracingSession::enter().unwrap();
    assert!(matches!(
        ag.trace(h, &[Argument::Dynamic(Value::Int(1))]),
        Err(AutographError::Session(SessionError::Reentry))
    ));
    session.exit();
    assert!(ag.trace(h, &[Argument::Dynamic(Value::Int(1))]).is_ok());
}
