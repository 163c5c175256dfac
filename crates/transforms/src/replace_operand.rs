//! Swaps the operand of a single instruction, keeping opcode and id.

use sigpatch_core::instruction::check_operand;
use sigpatch_core::{MethodDecl, Operand};

use crate::{Error, Patch, PatchState, Result, body_of, postcondition};

/// Replaces the operand at `index`. A replacement callee must have the same stack signature as
/// the original, and a replacement target must name an instruction in the body.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceOperand {
    pub index: usize,
    pub operand: Operand,
}

impl ReplaceOperand {
    pub fn new(index: usize, operand: Operand) -> Self {
        Self { index, operand }
    }
}

impl Patch for ReplaceOperand {
    fn name(&self) -> &'static str {
        "ReplaceOperand"
    }

    fn plan(&self, method: &MethodDecl) -> Result<PatchState> {
        let body = body_of(method)?;
        let ins = body.get(self.index).ok_or_else(|| {
            Error::Precondition(format!(
                "index {} outside a body of {} instructions",
                self.index,
                body.len()
            ))
        })?;
        if ins.operand == self.operand {
            return Ok(PatchState::AlreadyApplied);
        }

        check_operand(ins.opcode, &self.operand)
            .map_err(|e| Error::Precondition(e.to_string()))?;
        if let (Operand::Method(old), Operand::Method(new)) = (&ins.operand, &self.operand)
            && !old.same_stack_signature(new)
        {
            return Err(Error::Precondition(format!(
                "{} does not have the stack signature of {}",
                new.name, old.name
            )));
        }
        for target in self.operand.targets() {
            if body.index_of(target).is_none() {
                return Err(Error::Precondition(format!("target {target} is not in the body")));
            }
        }

        let mut patched = body.clone();
        patched.replace_at(self.index, ins.opcode, self.operand.clone())?;
        postcondition(method, &patched)?;
        Ok(PatchState::Pending(patched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigpatch_core::builder::{BodyBuilder, MethodBuilder, static_ref};
    use sigpatch_core::{InstrId, Opcode, TypeRef, TypeSig};

    fn method() -> MethodDecl {
        let body = BodyBuilder::new()
            .ldstr("https://license.example.com/check")
            .call(static_ref(
                TypeRef::local("Net", "Http"),
                "Get",
                vec![TypeSig::String],
                TypeSig::Boolean,
            ))
            .ret()
            .build()
            .unwrap();
        MethodBuilder::new("Verify", TypeSig::Boolean).body(body).build()
    }

    #[test]
    fn string_operand_is_replaced() {
        let mut m = method();
        let op = ReplaceOperand::new(0, Operand::String("http://127.0.0.1/check".into()));
        let PatchState::Pending(body) = op.plan(&m).unwrap() else {
            panic!("expected a new body");
        };
        assert_eq!(body.instructions[0].string_literal(), Some("http://127.0.0.1/check"));
        assert_eq!(body.instructions[0].id, InstrId(0));
        m.body = Some(body);
        assert_eq!(op.plan(&m).unwrap(), PatchState::AlreadyApplied);
    }

    #[test]
    fn incompatible_operands_are_rejected() {
        let m = method();
        assert!(matches!(
            ReplaceOperand::new(0, Operand::Int32(1)).plan(&m),
            Err(Error::Precondition(_))
        ));
        let wider = static_ref(
            TypeRef::local("Net", "Http"),
            "Post",
            vec![TypeSig::String, TypeSig::String],
            TypeSig::Boolean,
        );
        assert!(matches!(
            ReplaceOperand::new(1, Operand::Method(wider)).plan(&m),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            ReplaceOperand::new(7, Operand::None).plan(&m),
            Err(Error::Precondition(_))
        ));
    }

    #[test]
    fn callee_with_same_signature_is_accepted() {
        let m = method();
        let offline = static_ref(
            TypeRef::local("Net", "Offline"),
            "Get",
            vec![TypeSig::String],
            TypeSig::Boolean,
        );
        let op = ReplaceOperand::new(1, Operand::Method(offline.clone()));
        let PatchState::Pending(body) = op.plan(&m).unwrap() else {
            panic!("expected a new body");
        };
        assert_eq!(body.instructions[1].opcode, Opcode::Call);
        assert_eq!(body.instructions[1].method_ref(), Some(&offline));
    }
}
