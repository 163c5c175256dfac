//! Removes the branch that consumes a guard call's boolean result.
//!
//! A guard site is a call pushing one value followed, within the matcher window, by a
//! `brtrue`/`brfalse` that consumes exactly that value. The call is replaced by one `pop` per
//! argument it took and the branch becomes a `nop`, so the code after the branch always runs
//! and the stack height at every point is unchanged.

use tracing::debug;

use sigpatch_core::detection::{InstrPredicate, MatchMode, Matcher, OpClass};
use sigpatch_core::flow::FlowGraph;
use sigpatch_core::module::MethodBody;
use sigpatch_core::opcode::FlowControl;
use sigpatch_core::{InstrId, MethodDecl, MethodRef, Opcode, Operand};

use crate::{Error, Patch, PatchState, Result, body_of, postcondition};

/// A call and the branch that consumes its result, by index into the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardSite {
    pub call: usize,
    pub branch: usize,
}

/// Finds every site in `body` where a call to `guard` is followed by a branch matching
/// `branch`, within the matcher's window.
pub fn find_sites(
    body: &MethodBody,
    guard: &MethodRef,
    branch: &InstrPredicate,
    matcher: &Matcher,
) -> Vec<GuardSite> {
    let pattern = [InstrPredicate::call_to(guard.clone()), branch.clone()];
    matcher
        .find_all(body, &pattern, MatchMode::Windowed)
        .into_iter()
        .map(|m| GuardSite {
            call: m.indices[0],
            branch: m.indices[1],
        })
        .collect()
}

/// Branch predicate for `brfalse` only, or for either unary branch.
pub fn branch_predicate(false_only: bool) -> InstrPredicate {
    if false_only {
        InstrPredicate::new(OpClass::BranchFalse)
    } else {
        InstrPredicate::new(OpClass::UnaryBranch)
    }
}

/// True when a neutralized site lies within `look_behind` instructions before `anchor`: a `nop`
/// left by the branch directly after the `nop` or `pop` left by the call, with no unary branch
/// between it and the anchor.
pub fn neutralized_before(body: &MethodBody, anchor: usize, look_behind: usize) -> bool {
    let end = anchor.min(body.len());
    let lo = anchor.saturating_sub(look_behind).max(1);
    (lo..end).rev().any(|b| {
        body.instructions[b].opcode == Opcode::Nop
            && matches!(body.instructions[b - 1].opcode, Opcode::Nop | Opcode::Pop)
            && !body.instructions[b + 1..end]
                .iter()
                .any(|ins| ins.opcode.is_unary_branch())
    })
}

/// Neutralizes one or more guard sites in a single body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeutralizeGuard {
    pub sites: Vec<GuardSite>,
    /// Largest span, in instructions, from call to branch inclusive.
    pub window: usize,
}

/// A site resolved to instruction ids so that later rewrites cannot shift it.
struct PinnedSite {
    call: InstrId,
    branch: InstrId,
    pops: usize,
    target: InstrId,
}

impl NeutralizeGuard {
    pub fn new(sites: Vec<GuardSite>, window: usize) -> Self {
        Self { sites, window }
    }

    fn is_applied(body: &MethodBody, site: &GuardSite) -> bool {
        let call_gone = body
            .get(site.call)
            .is_some_and(|ins| matches!(ins.opcode, Opcode::Pop | Opcode::Nop));
        let branch_gone = body.get(site.branch).is_some_and(|ins| ins.opcode == Opcode::Nop);
        call_gone && branch_gone
    }

    fn check(&self, method: &MethodDecl, body: &MethodBody, site: &GuardSite) -> Result<PinnedSite> {
        let fail = |msg: String| Error::Precondition(format!("site {}..{}: {msg}", site.call, site.branch));
        let arity = method.return_arity();

        let call = body
            .get(site.call)
            .ok_or_else(|| fail("call index out of range".into()))?;
        let callee = match (call.opcode.is_call(), &call.operand) {
            (true, Operand::Method(m)) => m,
            _ => return Err(fail(format!("{} is not a call", call.opcode))),
        };
        if call.stack_effect(arity).pushes != 1 {
            return Err(fail(format!("{} does not push exactly one value", callee.name)));
        }

        if site.branch <= site.call || site.branch - site.call >= self.window.max(2) {
            return Err(fail("branch is not within the window after the call".into()));
        }
        let branch = body
            .get(site.branch)
            .ok_or_else(|| fail("branch index out of range".into()))?;
        if !branch.opcode.is_unary_branch() {
            return Err(fail(format!("{} is not brtrue/brfalse", branch.opcode)));
        }
        let target = match branch.operand {
            Operand::Target(t) => t,
            _ => return Err(fail("branch has no target".into())),
        };
        if target == branch.id || body.index_of(target).is_none() {
            return Err(fail(format!("branch target {target} is not usable")));
        }

        // The value pushed by the call must survive untouched until the branch pops it.
        let mut depth = 1usize;
        for index in site.call + 1..=site.branch {
            if body.is_jump_target(index) {
                return Err(fail(format!("instruction {index} is a jump target")));
            }
            if index == site.branch {
                break;
            }
            let ins = &body.instructions[index];
            if ins.opcode.has_target() || ins.opcode.flow() != FlowControl::Next {
                return Err(fail(format!("{} interrupts straight-line flow", ins.opcode)));
            }
            let effect = ins.stack_effect(arity);
            if effect.pops >= depth {
                return Err(fail(format!("{} consumes the guard value", ins.opcode)));
            }
            depth = depth - effect.pops + effect.pushes;
        }
        if depth != 1 {
            return Err(fail(format!("{depth} values above the guard value at the branch")));
        }

        Ok(PinnedSite {
            call: call.id,
            branch: branch.id,
            pops: callee.call_pops(),
            target,
        })
    }
}

impl Patch for NeutralizeGuard {
    fn name(&self) -> &'static str {
        "NeutralizeGuard"
    }

    fn plan(&self, method: &MethodDecl) -> Result<PatchState> {
        let body = body_of(method)?;
        if self.sites.is_empty() {
            return Err(Error::Precondition("no guard sites".into()));
        }

        let mut pending: Vec<&GuardSite> = self
            .sites
            .iter()
            .filter(|s| !Self::is_applied(body, s))
            .collect();
        if pending.is_empty() {
            return Ok(PatchState::AlreadyApplied);
        }
        pending.sort_by_key(|s| std::cmp::Reverse(s.call));
        pending.dedup();

        let pinned = pending
            .into_iter()
            .map(|site| self.check(method, body, site))
            .collect::<Result<Vec<_>>>()?;

        let mut patched = body.clone();
        for site in &pinned {
            let branch = patched
                .index_of(site.branch)
                .ok_or(sigpatch_core::result::Error::DanglingId(site.branch.0))?;
            patched.nop_out(branch)?;

            let call = patched
                .index_of(site.call)
                .ok_or(sigpatch_core::result::Error::DanglingId(site.call.0))?;
            if site.pops == 0 {
                patched.nop_out(call)?;
            } else {
                patched.replace_at(call, Opcode::Pop, Operand::None)?;
                for _ in 1..site.pops {
                    patched.insert_after(call, Opcode::Pop, Operand::None)?;
                }
            }
            debug!(
                "{}: neutralized guard at {} (branch {}, {} pop(s))",
                method.name, site.call, site.branch, site.pops
            );
        }

        postcondition(method, &patched)?;
        let flow = FlowGraph::build(&patched);
        for site in &pinned {
            let reachable = patched
                .index_of(site.target)
                .is_some_and(|index| flow.is_reachable(index));
            if !reachable {
                return Err(Error::Precondition(format!(
                    "former branch target {} is no longer reachable",
                    site.target
                )));
            }
        }
        Ok(PatchState::Pending(patched))
    }
}
