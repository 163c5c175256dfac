//! Turns a straight-line, stack-neutral run of instructions into `nop`s.

use sigpatch_core::detection::{InstrPredicate, Matcher};
use sigpatch_core::module::MethodBody;
use sigpatch_core::{MethodDecl, Opcode};

use crate::{Error, Patch, PatchState, Result, body_of, postcondition};

/// Excises the inclusive index range `start..=end`. Instruction ids are kept, so branches into
/// the range land on a `nop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExciseRegion {
    pub start: usize,
    pub end: usize,
}

impl ExciseRegion {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Every non-overlapping `start`..`end` run in `body`, where `end` is the first instruction
    /// at or after the start satisfying the end predicate.
    pub fn find_all(
        body: &MethodBody,
        start: &InstrPredicate,
        end: &InstrPredicate,
        matcher: &Matcher,
    ) -> Vec<Self> {
        let mut regions = Vec::new();
        let mut cursor = 0;
        for first in matcher.positions(body, start) {
            if first < cursor {
                continue;
            }
            let Some(last) = (first..body.len())
                .find(|&i| end.matches(&body.instructions[i], &matcher.shape))
            else {
                break;
            };
            regions.push(Self::new(first, last));
            cursor = last + 1;
        }
        regions
    }

    /// True when `body` holds a run of at least `min_len` consecutive `nop`s, the shape an
    /// excised region leaves behind.
    pub fn left_behind(body: &MethodBody, min_len: usize) -> bool {
        let min_len = min_len.max(1);
        let mut run = 0;
        body.instructions.iter().any(|ins| {
            run = if ins.opcode == Opcode::Nop { run + 1 } else { 0 };
            run >= min_len
        })
    }

    fn check(&self, body: &MethodBody, arity: usize) -> Result<()> {
        if self.start > self.end || self.end >= body.len() {
            return Err(Error::Precondition(format!(
                "region {}..={} outside a body of {} instructions",
                self.start,
                self.end,
                body.len()
            )));
        }
        let mut depth: isize = 0;
        for ins in &body.instructions[self.start..=self.end] {
            if ins.opcode.has_target()
                || matches!(
                    ins.opcode,
                    Opcode::Ret | Opcode::Throw | Opcode::Rethrow | Opcode::Endfinally
                )
            {
                return Err(Error::Precondition(format!(
                    "region contains {} at {}",
                    ins.opcode, ins.id
                )));
            }
            let effect = ins.stack_effect(arity);
            depth -= effect.pops as isize;
            if depth < 0 {
                return Err(Error::Precondition(format!(
                    "{} at {} pops a value pushed before the region",
                    ins.opcode, ins.id
                )));
            }
            depth += effect.pushes as isize;
        }
        if depth != 0 {
            return Err(Error::Precondition(format!(
                "region leaves {depth} value(s) on the stack"
            )));
        }
        Ok(())
    }
}

impl Patch for ExciseRegion {
    fn name(&self) -> &'static str {
        "ExciseRegion"
    }

    fn plan(&self, method: &MethodDecl) -> Result<PatchState> {
        let body = body_of(method)?;
        if let Some(run) = body.instructions.get(self.start..=self.end)
            && run.iter().all(|ins| ins.opcode == Opcode::Nop)
        {
            return Ok(PatchState::AlreadyApplied);
        }
        self.check(body, method.return_arity())?;

        let mut patched = body.clone();
        for index in self.start..=self.end {
            patched.nop_out(index)?;
        }
        postcondition(method, &patched)?;
        Ok(PatchState::Pending(patched))
    }
}
