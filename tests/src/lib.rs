//! Shared fixtures for the sigpatch integration tests.

use sigpatch_core::builder::{
    BodyBuilder, MethodBuilder, ModuleBuilder, TypeBuilder, instance_ref, static_ref,
};
use sigpatch_core::{MethodRef, Module, Opcode, TypeRef, TypeSig};

/// Installs a debug-level subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .try_init();
}

pub fn gate_type() -> TypeRef {
    TypeRef::local("", "QX7RT2MZKA")
}

/// `QX7RT2MZKA::HBIHPPNHFPE`, the real license check.
pub fn pro_check() -> MethodRef {
    static_ref(gate_type(), "HBIHPPNHFPE", vec![], TypeSig::Boolean)
}

/// `QX7RT2MZKA::KOJPNKHPGCL`, a second accessor of the same shape.
pub fn trial_check() -> MethodRef {
    static_ref(gate_type(), "KOJPNKHPGCL", vec![], TypeSig::Boolean)
}

pub fn logger() -> MethodRef {
    instance_ref(
        TypeRef::external("corlib", "System", "Logger"),
        "Write",
        vec![TypeSig::String],
        TypeSig::Void,
    )
}

pub fn dialog() -> MethodRef {
    static_ref(TypeRef::local("UI", "Dialog"), "Show", vec![TypeSig::String], TypeSig::Void)
}

fn accessor(name: &str) -> sigpatch_core::MethodDecl {
    MethodBuilder::new(name, TypeSig::Boolean)
        .body(BodyBuilder::new().ldc_i4(0).ret().build().expect("accessor body"))
        .build()
}

/// A small obfuscated application:
///
/// - `QX7RT2MZKA` holds two indistinguishable bool accessors; `IsPro` names the first;
/// - `App.Presence::Update` logs "state", checks `HBIHPPNHFPE` and then logs "512_2";
/// - `App.Shop::Open` checks `KOJPNKHPGCL` and shows an upgrade dialog when it fails;
/// - `UI.Dialog::Show` is the dialog.
pub fn licensed_app() -> Module {
    ModuleBuilder::new("GameApp")
        .dependency("corlib")
        .ty(TypeBuilder::new("", "QX7RT2MZKA")
            .method(accessor("HBIHPPNHFPE"))
            .method(accessor("KOJPNKHPGCL"))
            .property("IsPro", TypeSig::Boolean, "HBIHPPNHFPE")
            .build())
        .ty(TypeBuilder::new("App", "Presence")
            .method(MethodBuilder::new("Update", TypeSig::Void)
                .instance()
                .body(BodyBuilder::new()
                    .ldarg(0)
                    .ldstr("state")
                    .callvirt(logger())
                    .call(pro_check())
                    .branch(Opcode::Brfalse, "end")
                    .ldarg(0)
                    .ldstr("512_2")
                    .callvirt(logger())
                    .label("end")
                    .ret()
                    .build()
                    .expect("presence body"))
                .build())
            .build())
        .ty(TypeBuilder::new("App", "Shop")
            .method(MethodBuilder::new("Open", TypeSig::Void)
                .body(BodyBuilder::new()
                    .call(trial_check())
                    .branch(Opcode::Brfalse, "locked")
                    .ldstr("Unlocked")
                    .call(dialog())
                    .ret()
                    .label("locked")
                    .ldstr("Upgrade required")
                    .call(dialog())
                    .ret()
                    .build()
                    .expect("shop body"))
                .build())
            .build())
        .ty(TypeBuilder::new("UI", "Dialog")
            .method(MethodBuilder::new("Show", TypeSig::Void)
                .param("text", TypeSig::String)
                .body(BodyBuilder::new().ret().build().expect("dialog body"))
                .build())
            .build())
        .build()
}

/// Goal file exercising every strategy and action against [`licensed_app`].
pub const GOALS: &str = r#"{
    "locator": { "tie_tolerance": 0.0 },
    "goals": [
        {
            "name": "presence-guard",
            "role": { "anchor": { "host_strings": ["state"], "anchor": "512_2" } },
            "action": { "type": "neutralize_guards", "branch": "false_only" }
        },
        {
            "name": "pro-accessor",
            "role": { "known_names": [{ "type_name": "QX7RT2MZKA", "member": "IsPro" }] },
            "action": { "type": "constant_return", "value": { "kind": "bool", "value": true } }
        },
        {
            "name": "upgrade-dialog",
            "role": { "known_names": [{ "namespace": "App", "type_name": "Shop", "member": "Open" }] },
            "action": {
                "type": "excise_region",
                "start": { "class": "load_string", "constraints": [{ "kind": "string_equals", "value": "Upgrade required" }] },
                "end": { "class": "any_call" }
            }
        },
        {
            "name": "features-flag",
            "action": { "type": "define_flag", "type_name": "App.Features", "property": "IsPro" }
        }
    ]
}"#;
