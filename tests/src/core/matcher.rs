use sigpatch_core::detection::{
    InstrPredicate, MatchMode, Matcher, MatcherConfig, OpClass, OperandConstraint,
};
use sigpatch_tests::{init_tracing, licensed_app};

fn update_body() -> sigpatch_core::MethodBody {
    let module = licensed_app();
    module.types[1].methods[0].body.clone().unwrap()
}

#[test]
fn test_windowed_match_spans_unrelated_instructions() {
    init_tracing();
    let body = update_body();
    let matcher = Matcher::new(MatcherConfig::default());
    let pattern = [
        InstrPredicate::string("state"),
        InstrPredicate::bool_zero_arg_call(),
        InstrPredicate::new(OpClass::BranchFalse),
    ];

    assert!(matcher.find_first(&body, &pattern, MatchMode::Contiguous).is_none());

    let m = matcher.find_first(&body, &pattern, MatchMode::Windowed).unwrap();
    assert_eq!(m.indices, vec![1, 3, 4]);
    assert_eq!(m.anchor(), 1);
    assert_eq!(m.end(), 4);
    assert!((m.confidence - 0.75).abs() < f64::EPSILON);
}

#[test]
fn test_window_bounds_the_span() {
    let body = update_body();
    let narrow = Matcher::new(MatcherConfig {
        window: 3,
        ..Default::default()
    });
    let pattern = [
        InstrPredicate::string("state"),
        InstrPredicate::new(OpClass::BranchFalse),
    ];
    // "state" at 1, brfalse at 4: a span of four.
    assert!(narrow.find_all(&body, &pattern, MatchMode::Windowed).is_empty());
}

#[test]
fn test_anchor_search_prefers_nearest_then_earlier() {
    let body = update_body();
    let matcher = Matcher::new(MatcherConfig::default());
    let anchor = matcher.positions(&body, &InstrPredicate::string("512_2"))[0];
    assert_eq!(anchor, 6);

    let any_call = InstrPredicate::new(OpClass::AnyCall);
    // callvirt at 7 (distance 1) beats call at 3 and callvirt at 2.
    assert_eq!(matcher.find_all_around(&body, anchor, &any_call), vec![7, 3, 2]);
    assert_eq!(
        matcher.find_around(&body, anchor, &InstrPredicate::bool_zero_arg_call()),
        Some(3)
    );

    let short = Matcher::new(MatcherConfig {
        look_behind: 2,
        look_ahead: 0,
        ..Default::default()
    });
    assert_eq!(
        short.find_around(&body, anchor, &InstrPredicate::bool_zero_arg_call()),
        None
    );
}

#[test]
fn test_declaring_type_shape_uses_configured_shape() {
    let body = update_body();
    let pred = InstrPredicate::new(OpClass::AnyCall).with(OperandConstraint::DeclaringTypeShape);
    let matcher = Matcher::new(MatcherConfig::default());
    assert_eq!(matcher.positions(&body, &pred), vec![3]);

    let mut strict = Matcher::new(MatcherConfig::default());
    strict.shape.allow_digits = false;
    assert!(strict.positions(&body, &pred).is_empty());
}

#[test]
fn test_unbounded_distances_clamp_to_the_body() {
    let body = update_body();
    let wide = Matcher::new(MatcherConfig {
        window: usize::MAX,
        look_behind: usize::MAX,
        look_ahead: usize::MAX,
    });
    let any_call = InstrPredicate::new(OpClass::AnyCall);
    assert_eq!(wide.find_all_around(&body, 6, &any_call), vec![7, 3, 2]);

    let pattern = [
        InstrPredicate::string("state"),
        InstrPredicate::new(OpClass::BranchFalse),
    ];
    let m = wide.find_first(&body, &pattern, MatchMode::Windowed).unwrap();
    assert_eq!(m.indices, vec![1, 4]);
}
