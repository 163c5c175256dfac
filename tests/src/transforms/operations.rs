use sigpatch_core::detection::{InstrPredicate, Matcher, MatcherConfig, OpClass};
use sigpatch_core::validator::check_body;
use sigpatch_core::{MethodDecl, MethodId, Module, Opcode, Operand};
use sigpatch_tests::{dialog, init_tracing, licensed_app, pro_check, trial_check};
use sigpatch_transform::neutralize_guard::{branch_predicate, find_sites, neutralized_before};
use sigpatch_transform::{
    Constant, ConstantReturn, DefineFlag, Error, ExciseRegion, NeutralizeGuard, Patch,
    PatchState, ReplaceOperand, Staged,
};

const UPDATE: MethodId = MethodId::new(1, 0);
const OPEN: MethodId = MethodId::new(2, 0);

fn method(module: &Module, id: MethodId) -> MethodDecl {
    module.method(id).cloned().unwrap()
}

fn pending(state: PatchState) -> sigpatch_core::MethodBody {
    match state {
        PatchState::Pending(body) => body,
        PatchState::AlreadyApplied => panic!("expected a pending body"),
    }
}

fn with_body(method: &MethodDecl, body: sigpatch_core::MethodBody) -> MethodDecl {
    MethodDecl {
        body: Some(body),
        ..method.clone()
    }
}

#[test]
fn test_guard_removal_keeps_the_body_balanced() {
    init_tracing();
    let module = licensed_app();
    let update = method(&module, UPDATE);
    let before = update.body.clone().unwrap();
    let matcher = Matcher::new(MatcherConfig::default());

    let sites = find_sites(&before, &pro_check(), &branch_predicate(true), &matcher);
    assert_eq!(sites.len(), 1);
    assert_eq!((sites[0].call, sites[0].branch), (3, 4));

    let op = NeutralizeGuard::new(sites.clone(), matcher.config.window);
    let after = pending(op.plan(&update).unwrap());

    // The guard took no arguments, so nothing is inserted and every id survives.
    assert_eq!(after.len(), before.len());
    let ids = |b: &sigpatch_core::MethodBody| b.instructions.iter().map(|i| i.id).collect::<Vec<_>>();
    assert_eq!(ids(&after), ids(&before));
    assert_eq!(after.instructions[3].opcode, Opcode::Nop);
    assert_eq!(after.instructions[4].opcode, Opcode::Nop);
    assert_eq!(after.instructions[6].string_literal(), Some("512_2"));
    assert!(check_body(&after, 0).is_empty());

    let patched = with_body(&update, after);
    assert_eq!(op.plan(&patched).unwrap(), PatchState::AlreadyApplied);
}

#[test]
fn test_either_branch_sense_when_asked() {
    let module = licensed_app();
    let open = method(&module, OPEN);
    let body = open.body.as_ref().unwrap();
    let matcher = Matcher::new(MatcherConfig::default());

    assert_eq!(
        find_sites(body, &trial_check(), &branch_predicate(false), &matcher).len(),
        1
    );
    // `Open` calls the trial check, not the pro check.
    assert!(find_sites(body, &pro_check(), &branch_predicate(false), &matcher).is_empty());
}

#[test]
fn test_accessor_becomes_constant_return() {
    let module = licensed_app();
    let getter = method(&module, MethodId::new(0, 0));

    let body = pending(ConstantReturn::new(Constant::Bool(true)).plan(&getter).unwrap());
    assert_eq!(body.len(), 2);
    assert_eq!(body.instructions[0].opcode, Opcode::LdcI4);
    assert_eq!(body.instructions[0].operand, Operand::Int32(1));
    assert_eq!(body.instructions[1].opcode, Opcode::Ret);

    // The fixture accessors already return false.
    assert_eq!(
        ConstantReturn::new(Constant::Bool(false)).plan(&getter).unwrap(),
        PatchState::AlreadyApplied
    );

    let open = method(&module, OPEN);
    assert!(matches!(
        ConstantReturn::new(Constant::Bool(true)).plan(&open),
        Err(Error::Precondition(_))
    ));
    let emptied = pending(ConstantReturn::void().plan(&open).unwrap());
    assert_eq!(emptied.len(), 1);
    assert!(check_body(&emptied, 0).is_empty());
}

#[test]
fn test_upgrade_dialog_is_excised() {
    let module = licensed_app();
    let open = method(&module, OPEN);
    let body = open.body.as_ref().unwrap();
    let matcher = Matcher::new(MatcherConfig::default());

    let regions = ExciseRegion::find_all(
        body,
        &InstrPredicate::string("Upgrade required"),
        &InstrPredicate::new(OpClass::AnyCall),
        &matcher,
    );
    assert_eq!(regions, vec![ExciseRegion::new(5, 6)]);

    let after = pending(regions[0].plan(&open).unwrap());
    assert_eq!(after.instructions[5].opcode, Opcode::Nop);
    assert_eq!(after.instructions[6].opcode, Opcode::Nop);
    assert_eq!(after.instructions[7].opcode, Opcode::Ret);
    // The locked branch still lands on the first excised slot.
    assert_eq!(
        after.instructions[1].targets(),
        vec![body.instructions[5].id]
    );
    assert!(check_body(&after, 0).is_empty());

    assert_eq!(
        regions[0].plan(&with_body(&open, after)).unwrap(),
        PatchState::AlreadyApplied
    );

    // A lone string load leaves a value behind.
    assert!(matches!(
        ExciseRegion::new(2, 2).plan(&open),
        Err(Error::Precondition(_))
    ));
    // Control flow cannot be excised.
    assert!(matches!(
        ExciseRegion::new(0, 1).plan(&open),
        Err(Error::Precondition(_))
    ));
}

#[test]
fn test_operands_are_swapped_in_place() {
    let module = licensed_app();
    let update = method(&module, UPDATE);
    let body = update.body.as_ref().unwrap();

    let renamed = pending(
        ReplaceOperand::new(6, Operand::String("640_1".into()))
            .plan(&update)
            .unwrap(),
    );
    assert_eq!(renamed.instructions[6].string_literal(), Some("640_1"));
    assert_eq!(renamed.instructions[6].id, body.instructions[6].id);

    let rerouted = pending(
        ReplaceOperand::new(3, Operand::Method(trial_check()))
            .plan(&update)
            .unwrap(),
    );
    assert_eq!(rerouted.instructions[3].method_ref(), Some(&trial_check()));

    assert!(matches!(
        ReplaceOperand::new(3, Operand::Method(dialog())).plan(&update),
        Err(Error::Precondition(_))
    ));
    assert_eq!(
        ReplaceOperand::new(3, Operand::Method(pro_check()))
            .plan(&update)
            .unwrap(),
        PatchState::AlreadyApplied
    );
}

#[test]
fn test_flag_on_existing_property_pins_its_getter() {
    let module = licensed_app();
    match DefineFlag::new("QX7RT2MZKA", "IsPro", true).plan(&module).unwrap() {
        Some(Staged::Body { method, body }) => {
            assert_eq!(method, MethodId::new(0, 0));
            assert_eq!(body.instructions[0].operand, Operand::Int32(1));
        }
        other => panic!("expected a getter body, got {other:?}"),
    }
    assert_eq!(
        DefineFlag::new("QX7RT2MZKA", "IsPro", false).plan(&module).unwrap(),
        None
    );
}

#[test]
fn test_flag_on_missing_type_synthesizes_it() {
    let mut module = licensed_app();
    let flag = DefineFlag::new("App.Features", "IsPro", true);
    let Some(Staged::Type { index: None, decl }) = flag.plan(&module).unwrap() else {
        panic!("expected a new type");
    };
    assert!(decl.synthetic);
    assert_eq!(decl.full_name(), "App.Features");
    assert_eq!(decl.fields[0].name, "_isPro");
    let getter = decl.property("IsPro").and_then(|p| p.getter.clone());
    assert_eq!(getter.as_deref(), Some("get_IsPro"));
    assert!(decl.method_index("set_IsPro").is_some());

    module.types.push(decl);
    assert!(sigpatch_core::validator::validate_module(&module).is_ok());
    assert_eq!(flag.plan(&module).unwrap(), None);
}

#[test]
fn test_patched_shapes_are_recognised() {
    let module = licensed_app();
    let update = method(&module, UPDATE);
    let before = update.body.clone().unwrap();
    assert!(!neutralized_before(&before, 6, 20));

    let sites = find_sites(&before, &pro_check(), &branch_predicate(true), &Matcher::new(MatcherConfig::default()));
    let after = pending(NeutralizeGuard::new(sites, 6).plan(&update).unwrap());
    assert!(neutralized_before(&after, 6, 20));
    // The site must lie inside the look-behind.
    assert!(!neutralized_before(&after, 6, 1));

    let open = method(&module, OPEN);
    assert!(!ExciseRegion::left_behind(open.body.as_ref().unwrap(), 1));
    let excised = pending(ExciseRegion::new(5, 6).plan(&open).unwrap());
    assert!(ExciseRegion::left_behind(&excised, 2));
    assert!(!ExciseRegion::left_behind(&excised, 3));
}
