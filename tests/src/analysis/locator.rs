use sigpatch_analysis::scoring::{RulePredicate, ScoringRule};
use sigpatch_analysis::{
    AnchorSpec, KnownName, Locator, LocatorConfig, Resolution, Strategy, TargetRole,
    default_rules,
};
use sigpatch_core::builder::{BodyBuilder, MethodBuilder, TypeBuilder};
use sigpatch_core::detection::{InstrPredicate, MatcherConfig};
use sigpatch_core::module::StateMachineDecl;
use sigpatch_core::{MethodId, Module, TypeSig};
use sigpatch_tests::{init_tracing, licensed_app};

const PRO: MethodId = MethodId {
    ty: 0,
    method: 0,
    nested: None,
};
const TRIAL: MethodId = MethodId {
    ty: 0,
    method: 1,
    nested: None,
};

fn locator(module: &Module, config: LocatorConfig) -> Locator<'_> {
    Locator::new(module, config, MatcherConfig::default())
}

fn anchor_role(host: &str) -> TargetRole {
    TargetRole {
        anchor: Some(AnchorSpec {
            host_strings: vec![host.to_string()],
            anchor: "512_2".into(),
            callee: InstrPredicate::bool_zero_arg_call(),
        }),
        ..Default::default()
    }
}

#[test]
fn test_equally_shaped_accessors_are_ambiguous() {
    init_tracing();
    let module = licensed_app();
    let resolution = locator(&module, LocatorConfig::default()).resolve(&TargetRole::default());
    assert_eq!(
        resolution,
        Resolution::Ambiguous {
            candidates: vec![PRO, TRIAL],
            strategy: Strategy::Structural,
        }
    );
}

#[test]
fn test_call_graph_rule_breaks_the_tie() {
    let module = licensed_app();
    let mut rules = default_rules();
    rules.push(ScoringRule::new(
        RulePredicate::CalledFromStringHost {
            value: "state".into(),
        },
        2.0,
    ));
    let role = TargetRole {
        rules: Some(rules),
        ..Default::default()
    };

    match locator(&module, LocatorConfig::default()).resolve(&role) {
        Resolution::Found {
            method,
            confidence,
            strategy,
        } => {
            assert_eq!(method, PRO);
            assert_eq!(strategy, Strategy::Structural);
            assert!((confidence - 1.0).abs() < 1e-9);
        }
        other => panic!("expected a unique candidate, got {other:?}"),
    }

    // A tolerance wider than the margin makes the runner-up count again.
    let tolerant = LocatorConfig {
        tie_tolerance: 2.0,
        ..Default::default()
    };
    assert!(matches!(
        locator(&module, tolerant).resolve(&role),
        Resolution::Ambiguous { .. }
    ));
}

#[test]
fn test_content_anchor_finds_the_guard() {
    let module = licensed_app();
    let loc = locator(&module, LocatorConfig::default());
    assert_eq!(
        loc.resolve(&anchor_role("state")),
        Resolution::Found {
            method: PRO,
            confidence: 1.0,
            strategy: Strategy::ContentAnchor,
        }
    );

    // Without a qualifying host the anchor yields nothing and scoring decides.
    assert!(loc.content_anchor(anchor_role("missing").anchor.as_ref().unwrap()).is_empty());
    assert!(matches!(
        loc.resolve(&anchor_role("missing")),
        Resolution::Ambiguous {
            strategy: Strategy::Structural,
            ..
        }
    ));
}

#[test]
fn test_exact_names_resolve_properties_to_getters() {
    let module = licensed_app();
    let loc = locator(&module, LocatorConfig::default());
    let role = |namespace: Option<&str>, member: &str| TargetRole {
        known_names: vec![KnownName {
            namespace: namespace.map(str::to_string),
            type_name: "QX7RT2MZKA".into(),
            member: member.into(),
        }],
        rules: Some(Vec::new()),
        ..Default::default()
    };

    assert_eq!(loc.resolve(&role(None, "IsPro")).found(), Some(PRO));
    assert_eq!(loc.resolve(&role(Some(""), "KOJPNKHPGCL")).found(), Some(TRIAL));
    assert_eq!(loc.resolve(&role(Some("Other"), "IsPro")), Resolution::NotFound);
}

#[test]
fn test_resolution_is_deterministic() {
    let module = licensed_app();
    let copy = module.clone();
    let roles = [TargetRole::default(), anchor_role("state"), anchor_role("missing")];
    for role in &roles {
        let a = locator(&module, LocatorConfig::default()).resolve(role);
        let b = locator(&copy, LocatorConfig::default()).resolve(role);
        let c = locator(&module, LocatorConfig::default()).resolve(role);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }
}

#[test]
fn test_state_machine_step_methods_are_candidates() {
    let mut module = licensed_app();
    let step = MethodBuilder::new("MoveNext", TypeSig::Void)
        .instance()
        .body(BodyBuilder::new().ldstr("sync").pop().ret().build().unwrap())
        .build();
    let owner = MethodBuilder::new("Sync", TypeSig::Void)
        .body(BodyBuilder::new().ret().build().unwrap())
        .state_machine(StateMachineDecl {
            name: "<Sync>d__4".into(),
            fields: vec![],
            methods: vec![step],
            step_method: "MoveNext".into(),
        })
        .build();
    module
        .types
        .push(TypeBuilder::new("App", "Cloud").method(owner).build());

    let nested = MethodId::nested(module.types.len() - 1, 0, 0);
    let role = TargetRole {
        rules: Some(vec![ScoringRule::new(
            RulePredicate::ContainsString {
                value: "sync".into(),
            },
            10.0,
        )]),
        ..Default::default()
    };
    assert_eq!(
        locator(&module, LocatorConfig::default()).resolve(&role).found(),
        Some(nested)
    );
    assert_eq!(module.describe(nested), "App.Cloud/<Sync>d__4::MoveNext");
}
