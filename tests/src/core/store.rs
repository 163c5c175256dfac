use sigpatch_core::builder::{BodyBuilder, MethodBuilder, ModuleBuilder, TypeBuilder, static_ref};
use sigpatch_core::load_module;
use sigpatch_core::result::Error;
use sigpatch_core::store::{JsonStore, ModuleStore, digest_hex};
use sigpatch_core::{Module, Operand, TypeRef, TypeSig};
use sigpatch_tests::{init_tracing, licensed_app};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_round_trip_is_byte_stable() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = JsonStore::default();

    let first = dir.path().join("app.json");
    let receipt = store.write(&licensed_app(), &first).unwrap();
    assert_eq!(receipt.bytes, fs::metadata(&first).unwrap().len() as usize);

    let loaded = store.load(&first).unwrap();
    assert_eq!(loaded, licensed_app());

    let second = dir.path().join("again.json");
    let again = store.write(&loaded, &second).unwrap();
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    assert_eq!(receipt.digest, again.digest);
    assert_eq!(again.digest, digest_hex(&fs::read(&second).unwrap()));
}

#[test]
fn test_opcodes_are_stored_by_mnemonic() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.json");
    JsonStore::default().write(&licensed_app(), &path).unwrap();
    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"ldc.i4\""));
    assert!(raw.contains("\"brfalse\""));
    assert!(raw.ends_with('\n'));
}

fn with_foreign_call(scope: &str) -> Module {
    let foreign = static_ref(
        TypeRef::external(scope, "Net", "Client"),
        "Ping",
        vec![],
        TypeSig::Void,
    );
    ModuleBuilder::new("app")
        .dependency("corlib")
        .ty(TypeBuilder::new("App", "Main")
            .method(MethodBuilder::new("Run", TypeSig::Void)
                .body(BodyBuilder::new().call(foreign).ret().build().unwrap())
                .build())
            .build())
        .build()
}

#[test]
fn test_undeclared_dependency_is_a_load_failure() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.json");
    JsonStore::default().write(&with_foreign_call("netlib"), &path).unwrap();

    match load_module(&path, &[]) {
        Err(Error::LoadFailure { reason, .. }) => assert!(reason.contains("netlib"), "{reason}"),
        other => panic!("expected a load failure, got {other:?}"),
    }

    // Declared dependencies load even when their file is not present.
    JsonStore::default().write(&with_foreign_call("corlib"), &path).unwrap();
    assert!(load_module(&path, &[dir.path().to_path_buf()]).is_ok());
}

#[test]
fn test_malformed_and_missing_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ \"name\": ").unwrap();
    assert!(matches!(load_module(&path, &[]), Err(Error::LoadFailure { .. })));
    assert!(matches!(
        load_module(dir.path().join("absent.json"), &[]),
        Err(Error::FileRead { .. })
    ));
}

#[test]
fn test_duplicate_instruction_ids_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dup.json");
    let mut module = licensed_app();
    let body = module.types[0].methods[0].body.as_mut().unwrap();
    let first = body.instructions[0].id;
    body.instructions[1].id = first;
    JsonStore::default().write(&module, &path).unwrap();
    assert!(matches!(load_module(&path, &[]), Err(Error::LoadFailure { .. })));
}

#[test]
fn test_operand_mismatch_is_a_load_failure() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.json");
    let store = JsonStore::default();

    // `call` without a callee.
    let mut module = licensed_app();
    module.types[1].methods[0].body.as_mut().unwrap().instructions[3].operand = Operand::None;
    store.write(&module, &path).unwrap();
    match load_module(&path, &[]) {
        Err(Error::LoadFailure { reason, .. }) => assert!(reason.contains("call"), "{reason}"),
        other => panic!("expected a load failure, got {other:?}"),
    }

    // `ldc.i4` carrying a string.
    let mut module = licensed_app();
    module.types[0].methods[0].body.as_mut().unwrap().instructions[0].operand =
        Operand::String("1".into());
    store.write(&module, &path).unwrap();
    assert!(matches!(load_module(&path, &[]), Err(Error::LoadFailure { .. })));
}
