//! Instructions, operands and the member references they carry.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::opcode::{Opcode, OperandKind, StackEffect};
use crate::result::{Error, Result};

/// Body-unique, stable identifier of an instruction. Branch operands refer to these, never to
/// positions, so inserting or rewriting instructions keeps targets valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrId(pub u32);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to a type, either defined in the module (`scope == None`) or in a declared
/// external dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl TypeRef {
    /// Type defined in the module being patched.
    pub fn local(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: None,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Type defined in the named dependency.
    pub fn external(
        scope: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            scope: Some(scope.into()),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.scope.is_some()
    }

    /// `Namespace.Name`, or just `Name` for the empty namespace.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "[{}]{}", scope, self.full_name()),
            None => f.write_str(&self.full_name()),
        }
    }
}

/// Type signature used for parameters, return values, fields and locals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSig {
    Void,
    Boolean,
    Int32,
    Int64,
    Float64,
    String,
    Object,
    Class(TypeRef),
}

impl TypeSig {
    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// Values of this type occupy one stack slot; `void` occupies none.
    #[inline]
    pub fn stack_slots(&self) -> usize {
        usize::from(!self.is_void())
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Void => f.write_str("void"),
            TypeSig::Boolean => f.write_str("bool"),
            TypeSig::Int32 => f.write_str("int32"),
            TypeSig::Int64 => f.write_str("int64"),
            TypeSig::Float64 => f.write_str("float64"),
            TypeSig::String => f.write_str("string"),
            TypeSig::Object => f.write_str("object"),
            TypeSig::Class(ty) => write!(f, "{ty}"),
        }
    }
}

/// Reference to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub declaring_type: TypeRef,
    pub name: String,
    pub field_type: TypeSig,
}

/// Reference to a method together with the signature needed to compute stack effects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub declaring_type: TypeRef,
    pub name: String,
    #[serde(default)]
    pub params: Vec<TypeSig>,
    pub return_type: TypeSig,
    #[serde(default)]
    pub has_this: bool,
}

impl MethodRef {
    /// Values popped by a call to this method (arguments plus the receiver).
    #[inline]
    pub fn call_pops(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }

    /// True when two references pop and push the same number of values.
    pub fn same_stack_signature(&self, other: &MethodRef) -> bool {
        self.call_pops() == other.call_pops()
            && self.return_type.stack_slots() == other.return_type.stack_slots()
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}(", self.return_type, self.declaring_type, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(")")
    }
}

/// Inline operand of an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    #[default]
    None,
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Arg(u16),
    Local(u16),
    Field(FieldRef),
    Method(MethodRef),
    Type(TypeRef),
    Target(InstrId),
    Switch(Vec<InstrId>),
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::None => OperandKind::None,
            Operand::Int32(_) => OperandKind::Int32,
            Operand::Int64(_) => OperandKind::Int64,
            Operand::Float64(_) => OperandKind::Float64,
            Operand::String(_) => OperandKind::String,
            Operand::Arg(_) => OperandKind::Arg,
            Operand::Local(_) => OperandKind::Local,
            Operand::Field(_) => OperandKind::Field,
            Operand::Method(_) => OperandKind::Method,
            Operand::Type(_) => OperandKind::Type,
            Operand::Target(_) => OperandKind::Target,
            Operand::Switch(_) => OperandKind::Switch,
        }
    }

    /// Relative targets carried by this operand.
    pub fn targets(&self) -> Vec<InstrId> {
        match self {
            Operand::Target(t) => vec![*t],
            Operand::Switch(ts) => ts.clone(),
            _ => Vec::new(),
        }
    }
}

/// One instruction: stable id, opcode and inline operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstrId,
    pub opcode: Opcode,
    #[serde(default, skip_serializing_if = "is_none_operand")]
    pub operand: Operand,
}

fn is_none_operand(operand: &Operand) -> bool {
    matches!(operand, Operand::None)
}

impl Instruction {
    /// Builds an instruction, rejecting operands that do not fit the opcode.
    pub fn new(id: InstrId, opcode: Opcode, operand: Operand) -> Result<Self> {
        check_operand(opcode, &operand)?;
        Ok(Self { id, opcode, operand })
    }

    /// A `nop` with the given id.
    pub fn nop(id: InstrId) -> Self {
        Self {
            id,
            opcode: Opcode::Nop,
            operand: Operand::None,
        }
    }

    /// Stack effect of this instruction. `return_arity` is the stack slot count of the
    /// enclosing method's return type and only matters for `ret`.
    pub fn stack_effect(&self, return_arity: usize) -> StackEffect {
        match (self.opcode, &self.operand) {
            (Opcode::Call | Opcode::Callvirt, Operand::Method(m)) => {
                StackEffect::new(m.call_pops(), m.return_type.stack_slots())
            }
            (Opcode::Newobj, Operand::Method(m)) => StackEffect::new(m.params.len(), 1),
            (Opcode::Ret, _) => StackEffect::new(return_arity, 0),
            (op, _) => op.fixed_effect(),
        }
    }

    /// Callee reference for `call`/`callvirt`/`newobj`.
    pub fn method_ref(&self) -> Option<&MethodRef> {
        match &self.operand {
            Operand::Method(m) => Some(m),
            _ => None,
        }
    }

    pub fn string_literal(&self) -> Option<&str> {
        match (&self.opcode, &self.operand) {
            (Opcode::Ldstr, Operand::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn targets(&self) -> Vec<InstrId> {
        self.operand.targets()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5}: {}", self.id, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int32(v) => write!(f, " {v}"),
            Operand::Int64(v) => write!(f, " {v}"),
            Operand::Float64(v) => write!(f, " {v}"),
            Operand::String(s) => write!(f, " {s:?}"),
            Operand::Arg(a) => write!(f, " arg{a}"),
            Operand::Local(l) => write!(f, " loc{l}"),
            Operand::Field(fr) => write!(f, " {}::{}", fr.declaring_type, fr.name),
            Operand::Method(m) => write!(f, " {m}"),
            Operand::Type(t) => write!(f, " {t}"),
            Operand::Target(t) => write!(f, " {t}"),
            Operand::Switch(ts) => {
                let list: Vec<String> = ts.iter().map(|t| t.to_string()).collect();
                write!(f, " ({})", list.join(", "))
            }
        }
    }
}

/// Checks that `operand` is the kind `opcode` expects.
pub fn check_operand(opcode: Opcode, operand: &Operand) -> Result<()> {
    let expected = opcode.operand_kind();
    if operand.kind() == expected {
        Ok(())
    } else {
        Err(Error::InvalidOperand {
            opcode: opcode.mnemonic().to_string(),
            expected: format!("{expected:?}"),
        })
    }
}
