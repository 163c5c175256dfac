//! Fluent builders for modules, types, methods and bodies.
//!
//! Bodies use symbolic labels: `label("L")` binds `L` to the next instruction pushed, and
//! branches may refer to labels placed later. Labels are resolved to instruction ids in
//! [`BodyBuilder::build`].

use std::collections::HashMap;

use crate::instruction::{FieldRef, InstrId, MethodRef, Operand, TypeRef, TypeSig};
use crate::module::{
    ExceptionRegion, FieldDecl, HandlerKind, MethodBody, MethodDecl, Module, Param, PropertyDecl,
    StateMachineDecl, TypeDecl, Visibility,
};
use crate::opcode::Opcode;
use crate::result::{Error, Result};

const UNRESOLVED: InstrId = InstrId(u32::MAX);

/// Reference to a static method.
pub fn static_ref(
    declaring_type: TypeRef,
    name: impl Into<String>,
    params: Vec<TypeSig>,
    return_type: TypeSig,
) -> MethodRef {
    MethodRef {
        declaring_type,
        name: name.into(),
        params,
        return_type,
        has_this: false,
    }
}

/// Reference to an instance method.
pub fn instance_ref(
    declaring_type: TypeRef,
    name: impl Into<String>,
    params: Vec<TypeSig>,
    return_type: TypeSig,
) -> MethodRef {
    MethodRef {
        has_this: true,
        ..static_ref(declaring_type, name, params, return_type)
    }
}

struct PendingRegion {
    labels: [String; 4],
    handler: HandlerKind,
}

/// Builds a [`MethodBody`] with label-based branches.
#[derive(Default)]
pub struct BodyBuilder {
    body: MethodBody,
    labels: HashMap<String, InstrId>,
    unbound: Vec<String>,
    fixups: Vec<(usize, Vec<String>)>,
    regions: Vec<PendingRegion>,
    error: Option<Error>,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(mut self, opcode: Opcode, operand: Operand) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.body.push(opcode, operand) {
            Ok(id) => {
                for name in self.unbound.drain(..) {
                    self.labels.insert(name, id);
                }
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Binds `name` to the next instruction.
    pub fn label(mut self, name: &str) -> Self {
        self.unbound.push(name.to_string());
        self
    }

    pub fn op(self, opcode: Opcode) -> Self {
        self.emit(opcode, Operand::None)
    }

    pub fn op_with(self, opcode: Opcode, operand: Operand) -> Self {
        self.emit(opcode, operand)
    }

    pub fn nop(self) -> Self {
        self.op(Opcode::Nop)
    }

    pub fn ret(self) -> Self {
        self.op(Opcode::Ret)
    }

    pub fn pop(self) -> Self {
        self.op(Opcode::Pop)
    }

    pub fn ldc_i4(self, value: i32) -> Self {
        self.emit(Opcode::LdcI4, Operand::Int32(value))
    }

    pub fn ldstr(self, value: &str) -> Self {
        self.emit(Opcode::Ldstr, Operand::String(value.to_string()))
    }

    pub fn ldarg(self, index: u16) -> Self {
        self.emit(Opcode::Ldarg, Operand::Arg(index))
    }

    pub fn ldloc(self, index: u16) -> Self {
        self.emit(Opcode::Ldloc, Operand::Local(index))
    }

    pub fn stloc(self, index: u16) -> Self {
        self.emit(Opcode::Stloc, Operand::Local(index))
    }

    pub fn ldsfld(self, field: FieldRef) -> Self {
        self.emit(Opcode::Ldsfld, Operand::Field(field))
    }

    pub fn call(self, method: MethodRef) -> Self {
        self.emit(Opcode::Call, Operand::Method(method))
    }

    pub fn callvirt(self, method: MethodRef) -> Self {
        self.emit(Opcode::Callvirt, Operand::Method(method))
    }

    /// Branch-family instruction (`br`, `brfalse`, `leave`, ...) to a label.
    pub fn branch(mut self, opcode: Opcode, label: &str) -> Self {
        let at = self.body.len();
        self = self.emit(opcode, Operand::Target(UNRESOLVED));
        self.fixups.push((at, vec![label.to_string()]));
        self
    }

    pub fn switch(mut self, labels: &[&str]) -> Self {
        let at = self.body.len();
        self = self.emit(Opcode::Switch, Operand::Switch(vec![UNRESOLVED; labels.len()]));
        self.fixups
            .push((at, labels.iter().map(|l| l.to_string()).collect()));
        self
    }

    pub fn local(mut self, ty: TypeSig) -> Self {
        self.body.locals.push(ty);
        self
    }

    /// Exception region over labels `[try_start, try_end, handler_start, handler_end]`.
    pub fn region(mut self, labels: [&str; 4], handler: HandlerKind) -> Self {
        self.regions.push(PendingRegion {
            labels: labels.map(str::to_string),
            handler,
        });
        self
    }

    fn resolve(&self, label: &str) -> Result<InstrId> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::UnknownLabel(label.to_string()))
    }

    pub fn build(mut self) -> Result<MethodBody> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        for (at, names) in &self.fixups {
            let targets = names
                .iter()
                .map(|n| self.resolve(n))
                .collect::<Result<Vec<_>>>()?;
            let ins = &mut self.body.instructions[*at];
            ins.operand = if matches!(ins.operand, Operand::Switch(_)) {
                Operand::Switch(targets)
            } else {
                Operand::Target(targets[0])
            };
        }
        for pending in &self.regions {
            let [a, b, c, d] = &pending.labels;
            let region = ExceptionRegion {
                try_start: self.resolve(a)?,
                try_end: self.resolve(b)?,
                handler_start: self.resolve(c)?,
                handler_end: self.resolve(d)?,
                handler: pending.handler.clone(),
            };
            self.body.regions.push(region);
        }
        Ok(self.body)
    }
}

/// Builds a [`MethodDecl`].
pub struct MethodBuilder {
    decl: MethodDecl,
}

impl MethodBuilder {
    pub fn new(name: &str, return_type: TypeSig) -> Self {
        Self {
            decl: MethodDecl {
                name: name.to_string(),
                is_static: true,
                visibility: Visibility::Public,
                params: Vec::new(),
                return_type,
                body: None,
                state_machine: None,
            },
        }
    }

    pub fn instance(mut self) -> Self {
        self.decl.is_static = false;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.decl.visibility = visibility;
        self
    }

    pub fn param(mut self, name: &str, ty: TypeSig) -> Self {
        self.decl.params.push(Param {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn body(mut self, body: MethodBody) -> Self {
        self.decl.body = Some(body);
        self
    }

    pub fn state_machine(mut self, sm: StateMachineDecl) -> Self {
        self.decl.state_machine = Some(sm);
        self
    }

    pub fn build(self) -> MethodDecl {
        self.decl
    }
}

/// Builds a [`TypeDecl`].
pub struct TypeBuilder {
    decl: TypeDecl,
}

impl TypeBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            decl: TypeDecl::new(namespace, name),
        }
    }

    pub fn method(mut self, method: MethodDecl) -> Self {
        self.decl.methods.push(method);
        self
    }

    pub fn field(mut self, name: &str, field_type: TypeSig, is_static: bool) -> Self {
        self.decl.fields.push(FieldDecl {
            name: name.to_string(),
            field_type,
            is_static,
            visibility: Visibility::Private,
        });
        self
    }

    /// Property whose getter is a method of this type named `getter`.
    pub fn property(mut self, name: &str, property_type: TypeSig, getter: &str) -> Self {
        self.decl.properties.push(PropertyDecl {
            name: name.to_string(),
            property_type,
            getter: Some(getter.to_string()),
            setter: None,
        });
        self
    }

    pub fn build(self) -> TypeDecl {
        self.decl
    }
}

/// Builds a [`Module`].
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            module: Module::new(name),
        }
    }

    pub fn dependency(mut self, name: &str) -> Self {
        self.module.dependencies.push(name.to_string());
        self
    }

    pub fn ty(mut self, ty: TypeDecl) -> Self {
        self.module.types.push(ty);
        self
    }

    pub fn build(self) -> Module {
        self.module
    }
}
