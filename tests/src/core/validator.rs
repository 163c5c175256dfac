use sigpatch_core::builder::{BodyBuilder, static_ref};
use sigpatch_core::module::HandlerKind;
use sigpatch_core::validator::{Violation, check_body, validate_module};
use sigpatch_core::{InstrId, Opcode, TypeRef, TypeSig};
use sigpatch_tests::licensed_app;

#[test]
fn test_fixture_module_verifies() {
    assert!(validate_module(&licensed_app()).is_ok());
}

#[test]
fn test_dangling_branch_target_is_reported() {
    let mut body = BodyBuilder::new()
        .ldc_i4(1)
        .branch(Opcode::Brtrue, "end")
        .nop()
        .label("end")
        .ret()
        .build()
        .unwrap();
    // Drop the landing instruction.
    body.instructions.pop();
    body.push(Opcode::Ret, sigpatch_core::Operand::None).unwrap();

    let violations = check_body(&body, 0);
    assert!(violations.contains(&Violation::DanglingTarget {
        id: InstrId(1),
        target: InstrId(3),
    }));
}

#[test]
fn test_stack_effects_follow_callee_signature() {
    let add = static_ref(
        TypeRef::local("Math", "Ops"),
        "Add",
        vec![TypeSig::Int32, TypeSig::Int32],
        TypeSig::Int32,
    );
    let ok = BodyBuilder::new()
        .ldc_i4(1)
        .ldc_i4(2)
        .call(add.clone())
        .ret()
        .build()
        .unwrap();
    assert!(check_body(&ok, 1).is_empty());

    let short = BodyBuilder::new().ldc_i4(1).call(add).ret().build().unwrap();
    assert!(matches!(
        check_body(&short, 1).as_slice(),
        [Violation::Underflow { pops: 2, depth: 1, .. }]
    ));
}

#[test]
fn test_handler_entry_depth() {
    let fail = static_ref(TypeRef::local("App", "Io"), "Read", vec![], TypeSig::Void);
    let catch = HandlerKind::Catch {
        catch_type: TypeRef::external("corlib", "System", "Exception"),
    };
    let body = BodyBuilder::new()
        .label("try")
        .call(fail.clone())
        .label("try_end")
        .branch(Opcode::Leave, "end")
        .label("handler")
        .pop()
        .label("handler_end")
        .branch(Opcode::Leave, "end")
        .label("end")
        .ret()
        .region(["try", "try_end", "handler", "handler_end"], catch)
        .build()
        .unwrap();
    assert_eq!(check_body(&body, 0), vec![]);

    // A finally handler is entered with an empty stack, so the same pop underflows.
    let finally = BodyBuilder::new()
        .label("try")
        .call(fail)
        .label("try_end")
        .branch(Opcode::Leave, "end")
        .label("handler")
        .pop()
        .label("handler_end")
        .op(Opcode::Endfinally)
        .label("end")
        .ret()
        .region(["try", "try_end", "handler", "handler_end"], HandlerKind::Finally)
        .build()
        .unwrap();
    assert!(
        check_body(&finally, 0)
            .iter()
            .any(|v| matches!(v, Violation::Underflow { .. }))
    );
}

#[test]
fn test_rejoining_paths_must_agree() {
    // One path pushes before the join, the other does not.
    let body = BodyBuilder::new()
        .ldc_i4(0)
        .branch(Opcode::Brfalse, "join")
        .ldc_i4(7)
        .label("join")
        .ret()
        .build()
        .unwrap();
    let found = check_body(&body, 0);
    assert!(
        found
            .iter()
            .any(|v| matches!(v, Violation::JoinMismatch { .. })),
        "{found:?}"
    );
}
