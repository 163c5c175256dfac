use std::fs;
use std::path::Path;

use sigpatch_analysis::Strategy;
use sigpatch_core::builder::{BodyBuilder, MethodBuilder, TypeBuilder};
use sigpatch_core::result::Error;
use sigpatch_core::store::{JsonStore, ModuleStore};
use sigpatch_core::{Module, Opcode, TypeSig, load_module};
use sigpatch_tests::{GOALS, init_tracing, licensed_app};
use sigpatch_transform::{Outcome, PatchConfig, Patcher, RejectReason, Verdict};
use tempfile::tempdir;

fn patcher() -> Patcher {
    let config = PatchConfig::from_json(GOALS).unwrap();
    config.validate().unwrap();
    Patcher::new(config)
}

fn write(module: &Module, path: &Path) {
    JsonStore::default().write(module, path).unwrap();
}

#[test]
fn test_first_run_applies_every_goal() {
    init_tracing();
    let dir = tempdir().unwrap();
    let input = dir.path().join("app.json");
    write(&licensed_app(), &input);

    let mut module = load_module(&input, &[]).unwrap();
    let summary = patcher().run(&mut module);

    assert!(summary.ready, "{:?}", summary.validation_errors);
    assert_eq!(summary.applied(), 4);
    assert_eq!(summary.rejected(), 0);

    let guard = &summary.goals[0];
    assert_eq!(guard.verdict, Verdict::Found);
    assert_eq!(guard.strategy, Some(Strategy::ContentAnchor));
    assert_eq!(guard.target.as_deref(), Some("QX7RT2MZKA::HBIHPPNHFPE"));
    assert_eq!(
        guard.outcome,
        Outcome::Applied {
            methods: vec!["App.Presence::Update".into()],
        }
    );
    assert_eq!(summary.goals[1].strategy, Some(Strategy::ExactName));

    // Update now logs unconditionally.
    let update = module.types[1].methods[0].body.as_ref().unwrap();
    assert!(
        update
            .instructions
            .iter()
            .all(|i| i.opcode != Opcode::Brfalse && i.opcode != Opcode::Call)
    );
    let features = module.find_type("App", "Features").unwrap();
    assert!(module.types[features].synthetic);
}

#[test]
fn test_second_run_changes_nothing() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("app.json");
    write(&licensed_app(), &input);

    let mut module = load_module(&input, &[]).unwrap();
    assert!(patcher().run(&mut module).ready);
    let once = dir.path().join("once.json");
    write(&module, &once);

    let mut again = load_module(&once, &[]).unwrap();
    let second = patcher().run(&mut again);
    assert!(second.ready);
    assert_eq!(second.applied(), 0);
    assert_eq!(second.rejected(), 0);
    assert!(!second.changed());
    for goal in &second.goals {
        assert_eq!(goal.outcome, Outcome::AlreadyApplied, "{}", goal.goal);
    }
    // The guard is recognised at its former site rather than re-located by scoring.
    assert_eq!(second.goals[0].target.as_deref(), Some("App.Presence::Update"));

    let twice = dir.path().join("twice.json");
    write(&again, &twice);
    assert_eq!(fs::read(&once).unwrap(), fs::read(&twice).unwrap());
}

#[test]
fn test_invalid_module_is_restored() {
    let mut module = licensed_app();
    // A void method that leaves a value behind fails module verification.
    module.types.push(
        TypeBuilder::new("App", "Broken")
            .method(
                MethodBuilder::new("Run", TypeSig::Void)
                    .body(BodyBuilder::new().ldc_i4(1).ret().build().unwrap())
                    .build(),
            )
            .build(),
    );
    let original = module.clone();

    let summary = patcher().run(&mut module);
    assert!(!summary.ready);
    assert_eq!(summary.validation_errors.len(), 1);
    assert_eq!(summary.applied(), 0);
    assert!(summary.goals.iter().all(|g| matches!(
        &g.outcome,
        Outcome::Rejected {
            reason: RejectReason::RolledBack(_)
        }
    )));
    assert_eq!(module, original);
}

#[test]
fn test_failed_write_keeps_the_patched_module() {
    let dir = tempdir().unwrap();
    let mut module = licensed_app();
    assert!(patcher().run(&mut module).ready);
    let patched = module.clone();

    let store = JsonStore::default();
    let missing = dir.path().join("no-such-dir").join("out.json");
    assert!(matches!(
        store.write(&module, &missing),
        Err(Error::FileWrite { .. })
    ));
    assert!(!missing.exists());
    assert_eq!(module, patched);

    let out = dir.path().join("out.json");
    let receipt = store.write(&module, &out).unwrap();
    assert_eq!(receipt.path, out);
    assert_eq!(store.load(&out).unwrap(), patched);
}

#[test]
fn test_unpatched_shapes_are_not_taken_for_applied() {
    // Without the guard call and without a nop run, nothing reads as already applied.
    let mut module = licensed_app();
    let body = module.types[1].methods[0].body.as_mut().unwrap();
    body.replace_at(3, Opcode::LdcI4, sigpatch_core::Operand::Int32(1)).unwrap();
    let shop = module.types[2].methods[0].body.as_mut().unwrap();
    shop.replace_at(5, Opcode::Ldstr, sigpatch_core::Operand::String("Locked".into()))
        .unwrap();

    let summary = patcher().run(&mut module);
    assert!(summary.goals[0].outcome.is_rejected(), "{:?}", summary.goals[0]);
    assert_eq!(
        summary.goals[2].outcome,
        Outcome::Rejected {
            reason: RejectReason::Precondition("no region matches".into())
        }
    );
}
