//! Replaces a whole body with "push constant; return".

use serde::{Deserialize, Serialize};
use std::fmt;

use sigpatch_core::module::MethodBody;
use sigpatch_core::{MethodDecl, Opcode, Operand, TypeSig};

use crate::{Error, Patch, PatchState, Result, body_of, postcondition};

/// A constant a method can be made to return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Constant {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Null,
}

impl Constant {
    /// True if a value of this constant can be returned as `ty`.
    pub fn fits(&self, ty: &TypeSig) -> bool {
        match self {
            Constant::Bool(_) => *ty == TypeSig::Boolean,
            Constant::Int32(_) => *ty == TypeSig::Int32,
            Constant::Int64(_) => *ty == TypeSig::Int64,
            Constant::Float64(_) => *ty == TypeSig::Float64,
            Constant::String(_) => *ty == TypeSig::String,
            Constant::Null => matches!(ty, TypeSig::String | TypeSig::Object | TypeSig::Class(_)),
        }
    }

    /// Instruction that pushes the constant.
    pub fn load(&self) -> (Opcode, Operand) {
        match self {
            Constant::Bool(b) => (Opcode::LdcI4, Operand::Int32(i32::from(*b))),
            Constant::Int32(v) => (Opcode::LdcI4, Operand::Int32(*v)),
            Constant::Int64(v) => (Opcode::LdcI8, Operand::Int64(*v)),
            Constant::Float64(v) => (Opcode::LdcR8, Operand::Float64(*v)),
            Constant::String(s) => (Opcode::Ldstr, Operand::String(s.clone())),
            Constant::Null => (Opcode::Ldnull, Operand::None),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Int32(v) => write!(f, "{v}"),
            Constant::Int64(v) => write!(f, "{v}L"),
            Constant::Float64(v) => write!(f, "{v}"),
            Constant::String(s) => write!(f, "{s:?}"),
            Constant::Null => f.write_str("null"),
        }
    }
}

/// Makes a method return a constant (or just return, for `void`). Locals and exception regions
/// are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantReturn {
    pub value: Option<Constant>,
}

impl ConstantReturn {
    pub fn new(value: Constant) -> Self {
        Self { value: Some(value) }
    }

    /// `ret` only, for `void` methods.
    pub fn void() -> Self {
        Self { value: None }
    }

    fn target_shape(&self) -> Vec<(Opcode, Operand)> {
        let mut shape: Vec<_> = self.value.iter().map(Constant::load).collect();
        shape.push((Opcode::Ret, Operand::None));
        shape
    }
}

impl Patch for ConstantReturn {
    fn name(&self) -> &'static str {
        "ConstantReturn"
    }

    fn plan(&self, method: &MethodDecl) -> Result<PatchState> {
        let body = body_of(method)?;
        match &self.value {
            None if !method.return_type.is_void() => {
                return Err(Error::Precondition(format!(
                    "no value given for a method returning {}",
                    method.return_type
                )));
            }
            Some(c) if !c.fits(&method.return_type) => {
                return Err(Error::Precondition(format!(
                    "constant {c} does not fit return type {}",
                    method.return_type
                )));
            }
            _ => {}
        }

        let shape = self.target_shape();
        let current: Vec<(Opcode, &Operand)> = body
            .instructions
            .iter()
            .map(|i| (i.opcode, &i.operand))
            .collect();
        if current.len() == shape.len()
            && current.iter().zip(&shape).all(|(a, b)| a.0 == b.0 && *a.1 == b.1)
            && body.locals.is_empty()
            && body.regions.is_empty()
        {
            return Ok(PatchState::AlreadyApplied);
        }

        let mut patched = MethodBody::default();
        for (opcode, operand) in shape {
            patched.push(opcode, operand)?;
        }
        postcondition(method, &patched)?;
        Ok(PatchState::Pending(patched))
    }
}
