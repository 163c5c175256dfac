//! Instruction predicates: an opcode class plus operand constraints, expressible as plain data.

use serde::{Deserialize, Serialize};

use crate::detection::shape::NameShape;
use crate::instruction::{Instruction, MethodRef, Operand, TypeSig};
use crate::opcode::Opcode;

/// Class of opcodes a predicate accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpClass {
    /// Exactly this opcode.
    Opcode(Opcode),
    /// `call` or `callvirt`.
    AnyCall,
    /// Any conditional branch.
    CondBranch,
    /// `brtrue` or `brfalse`.
    UnaryBranch,
    BranchFalse,
    BranchTrue,
    LoadString,
    /// `ldc.i4` or `ldc.i8`.
    LoadInt,
    /// `ldfld` or `ldsfld`.
    LoadField,
    StoreLocal,
    Any,
}

impl OpClass {
    pub fn accepts(&self, opcode: Opcode) -> bool {
        match self {
            OpClass::Opcode(op) => *op == opcode,
            OpClass::AnyCall => opcode.is_call(),
            OpClass::CondBranch => opcode.is_conditional_branch(),
            OpClass::UnaryBranch => opcode.is_unary_branch(),
            OpClass::BranchFalse => opcode == Opcode::Brfalse,
            OpClass::BranchTrue => opcode == Opcode::Brtrue,
            OpClass::LoadString => opcode == Opcode::Ldstr,
            OpClass::LoadInt => matches!(opcode, Opcode::LdcI4 | Opcode::LdcI8),
            OpClass::LoadField => matches!(opcode, Opcode::Ldfld | Opcode::Ldsfld),
            OpClass::StoreLocal => opcode == Opcode::Stloc,
            OpClass::Any => true,
        }
    }
}

/// Constraint on the operand of a matched instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperandConstraint {
    StringEquals { value: String },
    StringContains { value: String },
    IntEquals { value: i64 },
    /// Callee is exactly this method.
    CalleeIs { method: MethodRef },
    /// Callee return type.
    CalleeReturns { ty: TypeSig },
    /// Callee parameter count, receiver excluded.
    CalleeArity { count: usize },
    CalleeStatic { is_static: bool },
    /// Callee or field name contains the fragment.
    NameContains { fragment: String },
    /// Declaring type of the callee or field has exactly this name.
    DeclaringTypeEquals { name: String },
    /// Declaring type of the callee or field looks obfuscated.
    DeclaringTypeShape,
}

impl OperandConstraint {
    pub fn holds(&self, operand: &Operand, shape: &NameShape) -> bool {
        match (self, operand) {
            (OperandConstraint::StringEquals { value }, Operand::String(s)) => s == value,
            (OperandConstraint::StringContains { value }, Operand::String(s)) => s.contains(value.as_str()),
            (OperandConstraint::IntEquals { value }, Operand::Int32(v)) => i64::from(*v) == *value,
            (OperandConstraint::IntEquals { value }, Operand::Int64(v)) => v == value,
            (OperandConstraint::CalleeIs { method }, Operand::Method(m)) => m == method,
            (OperandConstraint::CalleeReturns { ty }, Operand::Method(m)) => &m.return_type == ty,
            (OperandConstraint::CalleeArity { count }, Operand::Method(m)) => m.params.len() == *count,
            (OperandConstraint::CalleeStatic { is_static }, Operand::Method(m)) => {
                m.has_this != *is_static
            }
            (OperandConstraint::NameContains { fragment }, Operand::Method(m)) => {
                m.name.contains(fragment.as_str())
            }
            (OperandConstraint::NameContains { fragment }, Operand::Field(f)) => {
                f.name.contains(fragment.as_str())
            }
            (OperandConstraint::DeclaringTypeEquals { name }, Operand::Method(m)) => {
                &m.declaring_type.name == name
            }
            (OperandConstraint::DeclaringTypeEquals { name }, Operand::Field(f)) => {
                &f.declaring_type.name == name
            }
            (OperandConstraint::DeclaringTypeShape, Operand::Method(m)) => {
                shape.matches(&m.declaring_type.name)
            }
            (OperandConstraint::DeclaringTypeShape, Operand::Field(f)) => {
                shape.matches(&f.declaring_type.name)
            }
            _ => false,
        }
    }
}

/// Opcode class plus operand constraints; all constraints must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrPredicate {
    pub class: OpClass,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<OperandConstraint>,
}

impl InstrPredicate {
    pub fn new(class: OpClass) -> Self {
        Self {
            class,
            constraints: Vec::new(),
        }
    }

    pub fn opcode(opcode: Opcode) -> Self {
        Self::new(OpClass::Opcode(opcode))
    }

    pub fn with(mut self, constraint: OperandConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// A call to a zero-argument method returning `bool`.
    pub fn bool_zero_arg_call() -> Self {
        Self::new(OpClass::AnyCall)
            .with(OperandConstraint::CalleeReturns { ty: TypeSig::Boolean })
            .with(OperandConstraint::CalleeArity { count: 0 })
    }

    /// A call to exactly `method`.
    pub fn call_to(method: MethodRef) -> Self {
        Self::new(OpClass::AnyCall).with(OperandConstraint::CalleeIs { method })
    }

    /// `ldstr` with exactly this literal.
    pub fn string(value: impl Into<String>) -> Self {
        Self::new(OpClass::LoadString).with(OperandConstraint::StringEquals {
            value: value.into(),
        })
    }

    pub fn matches(&self, ins: &Instruction, shape: &NameShape) -> bool {
        self.class.accepts(ins.opcode)
            && self
                .constraints
                .iter()
                .all(|c| c.holds(&ins.operand, shape))
    }
}
