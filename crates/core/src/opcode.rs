//! Opcode table for the stack-machine instruction set carried by a module.
//!
//! Every opcode knows its operand kind, how it transfers control, and its stack effect. Calls
//! and returns are the only opcodes whose effect depends on something other than the opcode
//! itself (the callee signature or the enclosing method's return arity), see
//! [`crate::instruction::Instruction::stack_effect`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::result::Error;

/// Opcodes, serialized by mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Opcode {
    #[serde(rename = "nop")]
    Nop,
    #[serde(rename = "ldnull")]
    Ldnull,
    #[serde(rename = "ldc.i4")]
    LdcI4,
    #[serde(rename = "ldc.i8")]
    LdcI8,
    #[serde(rename = "ldc.r8")]
    LdcR8,
    #[serde(rename = "ldstr")]
    Ldstr,
    #[serde(rename = "ldarg")]
    Ldarg,
    #[serde(rename = "starg")]
    Starg,
    #[serde(rename = "ldloc")]
    Ldloc,
    #[serde(rename = "stloc")]
    Stloc,
    #[serde(rename = "ldfld")]
    Ldfld,
    #[serde(rename = "stfld")]
    Stfld,
    #[serde(rename = "ldsfld")]
    Ldsfld,
    #[serde(rename = "stsfld")]
    Stsfld,
    #[serde(rename = "call")]
    Call,
    #[serde(rename = "callvirt")]
    Callvirt,
    #[serde(rename = "newobj")]
    Newobj,
    #[serde(rename = "ret")]
    Ret,
    #[serde(rename = "br")]
    Br,
    #[serde(rename = "brtrue")]
    Brtrue,
    #[serde(rename = "brfalse")]
    Brfalse,
    #[serde(rename = "beq")]
    Beq,
    #[serde(rename = "bne")]
    Bne,
    #[serde(rename = "bge")]
    Bge,
    #[serde(rename = "bgt")]
    Bgt,
    #[serde(rename = "ble")]
    Ble,
    #[serde(rename = "blt")]
    Blt,
    #[serde(rename = "switch")]
    Switch,
    #[serde(rename = "leave")]
    Leave,
    #[serde(rename = "endfinally")]
    Endfinally,
    #[serde(rename = "throw")]
    Throw,
    #[serde(rename = "rethrow")]
    Rethrow,
    #[serde(rename = "pop")]
    Pop,
    #[serde(rename = "dup")]
    Dup,
    #[serde(rename = "add")]
    Add,
    #[serde(rename = "sub")]
    Sub,
    #[serde(rename = "mul")]
    Mul,
    #[serde(rename = "div")]
    Div,
    #[serde(rename = "rem")]
    Rem,
    #[serde(rename = "and")]
    And,
    #[serde(rename = "or")]
    Or,
    #[serde(rename = "xor")]
    Xor,
    #[serde(rename = "shl")]
    Shl,
    #[serde(rename = "shr")]
    Shr,
    #[serde(rename = "neg")]
    Neg,
    #[serde(rename = "not")]
    Not,
    #[serde(rename = "ceq")]
    Ceq,
    #[serde(rename = "cgt")]
    Cgt,
    #[serde(rename = "clt")]
    Clt,
    #[serde(rename = "conv.i4")]
    ConvI4,
    #[serde(rename = "conv.i8")]
    ConvI8,
    #[serde(rename = "conv.r8")]
    ConvR8,
    #[serde(rename = "box")]
    Box,
    #[serde(rename = "unbox.any")]
    UnboxAny,
    #[serde(rename = "castclass")]
    Castclass,
    #[serde(rename = "isinst")]
    Isinst,
    #[serde(rename = "newarr")]
    Newarr,
    #[serde(rename = "ldlen")]
    Ldlen,
    #[serde(rename = "ldelem")]
    Ldelem,
    #[serde(rename = "stelem")]
    Stelem,
    #[serde(rename = "ldtoken")]
    Ldtoken,
}

/// How an instruction hands control to its successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// Falls through to the next instruction.
    Next,
    /// Unconditional transfer to the operand target.
    Branch,
    /// Transfer to the operand target or fall through.
    CondBranch,
    /// Transfer to one of the operand targets or fall through.
    Switch,
    /// Leaves the method with the return value (if any) on the stack.
    Return,
    /// Raises an exception.
    Throw,
    /// Exits a protected region, emptying the stack.
    Leave,
    /// Ends a finally/fault handler.
    EndFinally,
}

/// What operand an opcode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperandKind {
    None,
    Int32,
    Int64,
    Float64,
    String,
    Arg,
    Local,
    Field,
    Method,
    Type,
    Target,
    Switch,
}

/// Stack-effect category of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackCategory {
    /// Pushes `n` values and pops nothing.
    Push(usize),
    /// Pops `n` values and pushes nothing.
    Pop(usize),
    /// Pops `pops` values, then pushes `pushes` values.
    PopPush(usize, usize),
    /// Transfers control; the popped count is reported by [`Opcode::fixed_effect`].
    Branch,
    /// Leaves the stack untouched.
    NoOp,
    /// Depends on the operand (calls) or on the enclosing method (return).
    Variable,
}

/// Number of values popped and pushed by one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackEffect {
    pub pops: usize,
    pub pushes: usize,
}

impl StackEffect {
    pub const fn new(pops: usize, pushes: usize) -> Self {
        Self { pops, pushes }
    }

    /// Net change in stack depth.
    #[inline]
    pub fn net(&self) -> isize {
        self.pushes as isize - self.pops as isize
    }
}

const ALL: &[Opcode] = &[
    Opcode::Nop,
    Opcode::Ldnull,
    Opcode::LdcI4,
    Opcode::LdcI8,
    Opcode::LdcR8,
    Opcode::Ldstr,
    Opcode::Ldarg,
    Opcode::Starg,
    Opcode::Ldloc,
    Opcode::Stloc,
    Opcode::Ldfld,
    Opcode::Stfld,
    Opcode::Ldsfld,
    Opcode::Stsfld,
    Opcode::Call,
    Opcode::Callvirt,
    Opcode::Newobj,
    Opcode::Ret,
    Opcode::Br,
    Opcode::Brtrue,
    Opcode::Brfalse,
    Opcode::Beq,
    Opcode::Bne,
    Opcode::Bge,
    Opcode::Bgt,
    Opcode::Ble,
    Opcode::Blt,
    Opcode::Switch,
    Opcode::Leave,
    Opcode::Endfinally,
    Opcode::Throw,
    Opcode::Rethrow,
    Opcode::Pop,
    Opcode::Dup,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Rem,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Neg,
    Opcode::Not,
    Opcode::Ceq,
    Opcode::Cgt,
    Opcode::Clt,
    Opcode::ConvI4,
    Opcode::ConvI8,
    Opcode::ConvR8,
    Opcode::Box,
    Opcode::UnboxAny,
    Opcode::Castclass,
    Opcode::Isinst,
    Opcode::Newarr,
    Opcode::Ldlen,
    Opcode::Ldelem,
    Opcode::Stelem,
    Opcode::Ldtoken,
];

impl Opcode {
    /// Every opcode in table order.
    pub fn all() -> &'static [Opcode] {
        ALL
    }

    /// Textual mnemonic, identical to the serialized form.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Ldnull => "ldnull",
            Opcode::LdcI4 => "ldc.i4",
            Opcode::LdcI8 => "ldc.i8",
            Opcode::LdcR8 => "ldc.r8",
            Opcode::Ldstr => "ldstr",
            Opcode::Ldarg => "ldarg",
            Opcode::Starg => "starg",
            Opcode::Ldloc => "ldloc",
            Opcode::Stloc => "stloc",
            Opcode::Ldfld => "ldfld",
            Opcode::Stfld => "stfld",
            Opcode::Ldsfld => "ldsfld",
            Opcode::Stsfld => "stsfld",
            Opcode::Call => "call",
            Opcode::Callvirt => "callvirt",
            Opcode::Newobj => "newobj",
            Opcode::Ret => "ret",
            Opcode::Br => "br",
            Opcode::Brtrue => "brtrue",
            Opcode::Brfalse => "brfalse",
            Opcode::Beq => "beq",
            Opcode::Bne => "bne",
            Opcode::Bge => "bge",
            Opcode::Bgt => "bgt",
            Opcode::Ble => "ble",
            Opcode::Blt => "blt",
            Opcode::Switch => "switch",
            Opcode::Leave => "leave",
            Opcode::Endfinally => "endfinally",
            Opcode::Throw => "throw",
            Opcode::Rethrow => "rethrow",
            Opcode::Pop => "pop",
            Opcode::Dup => "dup",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Rem => "rem",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::Neg => "neg",
            Opcode::Not => "not",
            Opcode::Ceq => "ceq",
            Opcode::Cgt => "cgt",
            Opcode::Clt => "clt",
            Opcode::ConvI4 => "conv.i4",
            Opcode::ConvI8 => "conv.i8",
            Opcode::ConvR8 => "conv.r8",
            Opcode::Box => "box",
            Opcode::UnboxAny => "unbox.any",
            Opcode::Castclass => "castclass",
            Opcode::Isinst => "isinst",
            Opcode::Newarr => "newarr",
            Opcode::Ldlen => "ldlen",
            Opcode::Ldelem => "ldelem",
            Opcode::Stelem => "stelem",
            Opcode::Ldtoken => "ldtoken",
        }
    }

    /// Operand carried by this opcode.
    pub fn operand_kind(&self) -> OperandKind {
        match self {
            Opcode::LdcI4 => OperandKind::Int32,
            Opcode::LdcI8 => OperandKind::Int64,
            Opcode::LdcR8 => OperandKind::Float64,
            Opcode::Ldstr => OperandKind::String,
            Opcode::Ldarg | Opcode::Starg => OperandKind::Arg,
            Opcode::Ldloc | Opcode::Stloc => OperandKind::Local,
            Opcode::Ldfld | Opcode::Stfld | Opcode::Ldsfld | Opcode::Stsfld => OperandKind::Field,
            Opcode::Call | Opcode::Callvirt | Opcode::Newobj => OperandKind::Method,
            Opcode::Box
            | Opcode::UnboxAny
            | Opcode::Castclass
            | Opcode::Isinst
            | Opcode::Newarr
            | Opcode::Ldelem
            | Opcode::Stelem
            | Opcode::Ldtoken => OperandKind::Type,
            Opcode::Br
            | Opcode::Brtrue
            | Opcode::Brfalse
            | Opcode::Beq
            | Opcode::Bne
            | Opcode::Bge
            | Opcode::Bgt
            | Opcode::Ble
            | Opcode::Blt
            | Opcode::Leave => OperandKind::Target,
            Opcode::Switch => OperandKind::Switch,
            _ => OperandKind::None,
        }
    }

    /// Control transfer performed by this opcode.
    pub fn flow(&self) -> FlowControl {
        match self {
            Opcode::Br => FlowControl::Branch,
            Opcode::Brtrue
            | Opcode::Brfalse
            | Opcode::Beq
            | Opcode::Bne
            | Opcode::Bge
            | Opcode::Bgt
            | Opcode::Ble
            | Opcode::Blt => FlowControl::CondBranch,
            Opcode::Switch => FlowControl::Switch,
            Opcode::Ret => FlowControl::Return,
            Opcode::Throw | Opcode::Rethrow => FlowControl::Throw,
            Opcode::Leave => FlowControl::Leave,
            Opcode::Endfinally => FlowControl::EndFinally,
            _ => FlowControl::Next,
        }
    }

    /// Stack-effect category used by the matcher and the report printer.
    pub fn category(&self) -> StackCategory {
        if matches!(self, Opcode::Call | Opcode::Callvirt | Opcode::Newobj | Opcode::Ret) {
            return StackCategory::Variable;
        }
        if !matches!(self.flow(), FlowControl::Next) {
            return StackCategory::Branch;
        }
        let effect = self.fixed_effect();
        match (effect.pops, effect.pushes) {
            (0, 0) => StackCategory::NoOp,
            (0, n) => StackCategory::Push(n),
            (n, 0) => StackCategory::Pop(n),
            (p, q) => StackCategory::PopPush(p, q),
        }
    }

    /// Stack effect of opcodes whose effect does not depend on an operand. Calls and `ret`
    /// report zero here; use [`crate::instruction::Instruction::stack_effect`] for those.
    pub fn fixed_effect(&self) -> StackEffect {
        match self {
            Opcode::Nop
            | Opcode::Br
            | Opcode::Leave
            | Opcode::Endfinally
            | Opcode::Rethrow
            | Opcode::Call
            | Opcode::Callvirt
            | Opcode::Newobj
            | Opcode::Ret => StackEffect::new(0, 0),
            Opcode::Ldnull
            | Opcode::LdcI4
            | Opcode::LdcI8
            | Opcode::LdcR8
            | Opcode::Ldstr
            | Opcode::Ldarg
            | Opcode::Ldloc
            | Opcode::Ldsfld
            | Opcode::Ldtoken => StackEffect::new(0, 1),
            Opcode::Starg
            | Opcode::Stloc
            | Opcode::Stsfld
            | Opcode::Brtrue
            | Opcode::Brfalse
            | Opcode::Switch
            | Opcode::Throw
            | Opcode::Pop => StackEffect::new(1, 0),
            Opcode::Stfld
            | Opcode::Beq
            | Opcode::Bne
            | Opcode::Bge
            | Opcode::Bgt
            | Opcode::Ble
            | Opcode::Blt => StackEffect::new(2, 0),
            Opcode::Stelem => StackEffect::new(3, 0),
            Opcode::Dup => StackEffect::new(1, 2),
            Opcode::Ldfld
            | Opcode::Neg
            | Opcode::Not
            | Opcode::ConvI4
            | Opcode::ConvI8
            | Opcode::ConvR8
            | Opcode::Box
            | Opcode::UnboxAny
            | Opcode::Castclass
            | Opcode::Isinst
            | Opcode::Newarr
            | Opcode::Ldlen => StackEffect::new(1, 1),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Ceq
            | Opcode::Cgt
            | Opcode::Clt
            | Opcode::Ldelem => StackEffect::new(2, 1),
        }
    }

    #[inline]
    pub fn is_call(&self) -> bool {
        matches!(self, Opcode::Call | Opcode::Callvirt)
    }

    /// True for `brtrue`/`brfalse`, the branches that test a single value.
    #[inline]
    pub fn is_unary_branch(&self) -> bool {
        matches!(self, Opcode::Brtrue | Opcode::Brfalse)
    }

    #[inline]
    pub fn is_conditional_branch(&self) -> bool {
        matches!(self.flow(), FlowControl::CondBranch)
    }

    /// True when the opcode carries one or more relative targets.
    #[inline]
    pub fn has_target(&self) -> bool {
        matches!(self.operand_kind(), OperandKind::Target | OperandKind::Switch)
    }
}

/// Returns true if the opcode ends every path through it.
#[inline]
pub fn is_terminal_opcode(opcode: Opcode) -> bool {
    matches!(
        opcode.flow(),
        FlowControl::Return | FlowControl::Throw | FlowControl::EndFinally
    )
}

/// Returns true if the opcode ends a basic block.
#[inline]
pub fn is_block_ending_opcode(opcode: Opcode) -> bool {
    !matches!(opcode.flow(), FlowControl::Next)
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Opcode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ALL.iter()
            .copied()
            .find(|op| op.mnemonic() == needle)
            .ok_or_else(|| Error::UnknownOpcode(s.to_string()))
    }
}
