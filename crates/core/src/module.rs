//! In-memory module model: types, methods, fields, properties, state machines and method bodies.
//!
//! The module exclusively owns every declaration and instruction. Everything else in the
//! workspace refers into it through [`MethodId`]s and instruction indices, which stay valid for
//! the duration of one patch pass.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::instruction::{FieldRef, InstrId, Instruction, MethodRef, Operand, TypeRef, TypeSig};
use crate::opcode::Opcode;
use crate::result::{Error, Result};

/// Member visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Internal,
    Protected,
    Private,
}

/// A named, typed method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeSig,
}

/// Kind of an exception handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerKind {
    /// Catches exceptions of `catch_type`; the exception object is on the stack at entry.
    Catch { catch_type: TypeRef },
    Finally,
    Fault,
}

impl HandlerKind {
    /// Stack depth on entry to the handler.
    #[inline]
    pub fn entry_depth(&self) -> usize {
        match self {
            HandlerKind::Catch { .. } => 1,
            HandlerKind::Finally | HandlerKind::Fault => 0,
        }
    }
}

/// A protected range and its handler, both as inclusive instruction-id ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRegion {
    pub try_start: InstrId,
    pub try_end: InstrId,
    pub handler_start: InstrId,
    pub handler_end: InstrId,
    pub handler: HandlerKind,
}

impl ExceptionRegion {
    pub fn ids(&self) -> [InstrId; 4] {
        [self.try_start, self.try_end, self.handler_start, self.handler_end]
    }
}

/// Ordered instruction list of a method plus its locals, exception regions and id counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MethodBody {
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub locals: Vec<TypeSig>,
    #[serde(default)]
    pub regions: Vec<ExceptionRegion>,
    #[serde(default)]
    pub next_id: u32,
}

impl MethodBody {
    /// Builds a body from existing instructions, deriving the id counter.
    pub fn from_instructions(instructions: Vec<Instruction>) -> Result<Self> {
        let mut body = Self {
            instructions,
            ..Default::default()
        };
        body.normalize()?;
        Ok(body)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Position of the instruction with the given id.
    pub fn index_of(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|ins| ins.id == id)
    }

    /// Allocates an id that is not used by any instruction in this body.
    pub fn fresh_id(&mut self) -> InstrId {
        let id = InstrId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Appends an instruction and returns its id.
    pub fn push(&mut self, opcode: Opcode, operand: Operand) -> Result<InstrId> {
        let id = self.fresh_id();
        self.instructions.push(Instruction::new(id, opcode, operand)?);
        Ok(id)
    }

    /// Rewrites the instruction at `index` in place, keeping its id.
    pub fn replace_at(&mut self, index: usize, opcode: Opcode, operand: Operand) -> Result<()> {
        let len = self.len();
        let slot = self
            .instructions
            .get_mut(index)
            .ok_or(Error::IndexOutOfBounds { index, len })?;
        *slot = Instruction::new(slot.id, opcode, operand)?;
        Ok(())
    }

    /// Inserts a fresh instruction right after `index` and returns its id.
    pub fn insert_after(&mut self, index: usize, opcode: Opcode, operand: Operand) -> Result<InstrId> {
        if index >= self.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        let id = self.fresh_id();
        self.instructions
            .insert(index + 1, Instruction::new(id, opcode, operand)?);
        Ok(id)
    }

    /// Turns the instruction at `index` into a `nop`, keeping its id.
    pub fn nop_out(&mut self, index: usize) -> Result<()> {
        self.replace_at(index, Opcode::Nop, Operand::None)
    }

    /// Rejects duplicate ids and moves the id counter past every id in use.
    pub fn normalize(&mut self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.len());
        let mut max = None;
        for ins in &self.instructions {
            if !seen.insert(ins.id) {
                return Err(Error::DuplicateId(ins.id.0));
            }
            max = max.max(Some(ins.id.0));
        }
        if let Some(max) = max {
            self.next_id = self.next_id.max(max + 1);
        }
        Ok(())
    }

    /// Ids that some branch, switch or leave in the body jumps to.
    pub fn branch_targets(&self) -> HashSet<InstrId> {
        self.instructions
            .iter()
            .flat_map(|ins| ins.targets())
            .collect()
    }

    /// Ids used as exception-region boundaries.
    pub fn region_ids(&self) -> HashSet<InstrId> {
        self.regions.iter().flat_map(|r| r.ids()).collect()
    }

    /// True when control can arrive at `index` from somewhere other than its predecessor.
    pub fn is_jump_target(&self, index: usize) -> bool {
        let Some(ins) = self.get(index) else {
            return false;
        };
        self.branch_targets().contains(&ins.id)
            || self
                .regions
                .iter()
                .any(|r| r.handler_start == ins.id || r.try_start == ins.id)
    }

    /// String literals loaded by `ldstr`, in body order.
    pub fn string_literals(&self) -> impl Iterator<Item = &str> {
        self.instructions.iter().filter_map(|ins| ins.string_literal())
    }

    /// Callees referenced by `call`/`callvirt`/`newobj`.
    pub fn callees(&self) -> impl Iterator<Item = &MethodRef> {
        self.instructions.iter().filter_map(|ins| ins.method_ref())
    }
}

/// Compiler-generated coroutine type owned by the method that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachineDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
    /// Name of the method that advances the state machine.
    pub step_method: String,
}

/// A method declaration. Abstract and external methods have no body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub params: Vec<Param>,
    pub return_type: TypeSig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<MethodBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_machine: Option<StateMachineDecl>,
}

impl MethodDecl {
    #[inline]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Stack slots left for `ret`.
    #[inline]
    pub fn return_arity(&self) -> usize {
        self.return_type.stack_slots()
    }

    /// The `static bool M()` accessor shape.
    pub fn is_bool_accessor(&self) -> bool {
        self.is_static && self.params.is_empty() && self.return_type == TypeSig::Boolean
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub field_type: TypeSig,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub visibility: Visibility,
}

/// A property: a name plus the getter/setter methods of the same type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    pub property_type: TypeSig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<String>,
}

/// A type declaration. The name may change between builds and is never relied upon for
/// semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
    /// Set on types created during patching.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

impl TypeDecl {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            synthetic: false,
        }
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::local(self.namespace.clone(), self.name.clone())
    }

    pub fn full_name(&self) -> String {
        self.type_ref().full_name()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }
}

/// Address of a method inside a module. `nested` selects a method of the state machine owned
/// by `types[ty].methods[method]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId {
    pub ty: usize,
    pub method: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<usize>,
}

impl MethodId {
    pub const fn new(ty: usize, method: usize) -> Self {
        Self {
            ty,
            method,
            nested: None,
        }
    }

    pub const fn nested(ty: usize, method: usize, nested: usize) -> Self {
        Self {
            ty,
            method,
            nested: Some(nested),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.nested {
            Some(n) => write!(f, "{}:{}:{}", self.ty, self.method, n),
            None => write!(f, "{}:{}", self.ty, self.method),
        }
    }
}

/// A loaded program module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    /// Names of external dependencies that references may be scoped to.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeDecl>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            types: Vec::new(),
        }
    }

    /// Every method in declaration order; a state machine's methods follow their owner.
    pub fn methods(&self) -> Vec<MethodId> {
        let mut ids = Vec::new();
        for (t, ty) in self.types.iter().enumerate() {
            for (m, method) in ty.methods.iter().enumerate() {
                ids.push(MethodId::new(t, m));
                if let Some(sm) = &method.state_machine {
                    ids.extend((0..sm.methods.len()).map(|n| MethodId::nested(t, m, n)));
                }
            }
        }
        ids
    }

    pub fn method(&self, id: MethodId) -> Option<&MethodDecl> {
        let owner = self.types.get(id.ty)?.methods.get(id.method)?;
        match id.nested {
            None => Some(owner),
            Some(n) => owner.state_machine.as_ref()?.methods.get(n),
        }
    }

    pub fn method_mut(&mut self, id: MethodId) -> Option<&mut MethodDecl> {
        let owner = self.types.get_mut(id.ty)?.methods.get_mut(id.method)?;
        match id.nested {
            None => Some(owner),
            Some(n) => owner.state_machine.as_mut()?.methods.get_mut(n),
        }
    }

    /// Like [`Module::method`] but reports a missing method as an error.
    pub fn require_method(&self, id: MethodId) -> Result<&MethodDecl> {
        self.method(id).ok_or_else(|| Error::UnknownMethod(id.to_string()))
    }

    /// Reference to the type that declares the method; state machines are `Outer/Inner`.
    pub fn declaring_type(&self, id: MethodId) -> Option<TypeRef> {
        let ty = self.types.get(id.ty)?;
        match id.nested {
            None => Some(ty.type_ref()),
            Some(_) => {
                let sm = ty.methods.get(id.method)?.state_machine.as_ref()?;
                Some(TypeRef::local(
                    ty.namespace.clone(),
                    format!("{}/{}", ty.name, sm.name),
                ))
            }
        }
    }

    /// Name of the declaring type, without namespace.
    pub fn type_name(&self, id: MethodId) -> Option<String> {
        self.declaring_type(id).map(|t| t.name)
    }

    /// `Namespace.Type::Method`, for logs and reports.
    pub fn describe(&self, id: MethodId) -> String {
        match (self.declaring_type(id), self.method(id)) {
            (Some(ty), Some(m)) => format!("{}::{}", ty.full_name(), m.name),
            _ => format!("<unknown {id}>"),
        }
    }

    /// Reference a call instruction would use to reach the method.
    pub fn method_ref(&self, id: MethodId) -> Option<MethodRef> {
        let m = self.method(id)?;
        Some(MethodRef {
            declaring_type: self.declaring_type(id)?,
            name: m.name.clone(),
            params: m.params.iter().map(|p| p.ty.clone()).collect(),
            return_type: m.return_type.clone(),
            has_this: !m.is_static,
        })
    }

    pub fn find_type(&self, namespace: &str, name: &str) -> Option<usize> {
        self.types
            .iter()
            .position(|t| t.namespace == namespace && t.name == name)
    }

    /// Resolves a reference to a method defined in this module. External references and
    /// references without a matching declaration resolve to `None`.
    pub fn resolve_method(&self, reference: &MethodRef) -> Option<MethodId> {
        if reference.declaring_type.is_external() {
            return None;
        }
        self.methods().into_iter().find(|&id| {
            self.method_ref(id).as_ref() == Some(reference)
        })
    }

    /// True when a field reference names a field declared in this module.
    fn resolves_field(&self, field: &FieldRef) -> bool {
        let decl = &field.declaring_type;
        if let Some(t) = self.find_type(&decl.namespace, &decl.name) {
            return self.types[t]
                .fields
                .iter()
                .any(|f| f.name == field.name && f.field_type == field.field_type);
        }
        // State machine fields are addressed as `Outer/Inner`.
        let Some((outer, inner)) = decl.name.split_once('/') else {
            return false;
        };
        let Some(t) = self.find_type(&decl.namespace, outer) else {
            return false;
        };
        self.types[t]
            .methods
            .iter()
            .filter_map(|m| m.state_machine.as_ref())
            .filter(|sm| sm.name == inner)
            .any(|sm| {
                sm.fields
                    .iter()
                    .any(|f| f.name == field.name && f.field_type == field.field_type)
            })
    }

    fn resolves_type(&self, ty: &TypeRef) -> bool {
        if self.find_type(&ty.namespace, &ty.name).is_some() {
            return true;
        }
        ty.name
            .split_once('/')
            .and_then(|(outer, inner)| {
                let t = self.find_type(&ty.namespace, outer)?;
                Some(
                    self.types[t]
                        .methods
                        .iter()
                        .filter_map(|m| m.state_machine.as_ref())
                        .any(|sm| sm.name == inner),
                )
            })
            .unwrap_or(false)
    }

    /// Every reference that does not resolve within the module or a declared dependency.
    pub fn unresolved_references(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let check_type = |ty: &TypeRef, site: &str, problems: &mut Vec<String>| match &ty.scope {
            Some(scope) if !self.dependencies.contains(scope) => {
                problems.push(format!("{site}: undeclared dependency `{scope}` for {ty}"));
            }
            Some(_) => {}
            None if !self.resolves_type(ty) => {
                problems.push(format!("{site}: unknown type {ty}"));
            }
            None => {}
        };

        for id in self.methods() {
            let Some(body) = self.method(id).and_then(|m| m.body.as_ref()) else {
                continue;
            };
            let site = self.describe(id);
            for ins in &body.instructions {
                match &ins.operand {
                    Operand::Method(m) => {
                        check_type(&m.declaring_type, &site, &mut problems);
                        if !m.declaring_type.is_external()
                            && self.resolves_type(&m.declaring_type)
                            && self.resolve_method(m).is_none()
                        {
                            problems.push(format!("{site}: unknown method {m}"));
                        }
                    }
                    Operand::Field(f) => {
                        check_type(&f.declaring_type, &site, &mut problems);
                        if !f.declaring_type.is_external()
                            && self.resolves_type(&f.declaring_type)
                            && !self.resolves_field(f)
                        {
                            problems.push(format!(
                                "{site}: unknown field {}::{}",
                                f.declaring_type, f.name
                            ));
                        }
                    }
                    Operand::Type(t) => check_type(t, &site, &mut problems),
                    _ => {}
                }
            }
            for region in &body.regions {
                if let HandlerKind::Catch { catch_type } = &region.handler {
                    check_type(catch_type, &site, &mut problems);
                }
            }
        }
        problems
    }
}
