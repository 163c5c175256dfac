//! Drives a goal set over one module.
//!
//! Each goal is located, planned against the current module, re-verified and only then
//! committed; a goal that fails at any step leaves the module untouched. After the last goal
//! the whole module is validated, and on failure the module is restored to the snapshot taken
//! before the first goal.

use tracing::{debug, info, warn};

use sigpatch_analysis::{Locator, Resolution, Strategy};
use sigpatch_core::detection::{InstrPredicate, Matcher};
use sigpatch_core::validator::{validate_body, validate_method, validate_module};
use sigpatch_core::{MethodId, Module};

use crate::constant_return::ConstantReturn;
use crate::excise_region::ExciseRegion;
use crate::goal::{BranchKind, GoalAction, OnAmbiguous, PatchConfig, PatchGoal};
use crate::neutralize_guard::{NeutralizeGuard, branch_predicate, find_sites, neutralized_before};
use crate::replace_operand::ReplaceOperand;
use crate::report::{GoalReport, Outcome, PatchSummary, RejectReason, Verdict};
use crate::synthesize::DefineFlag;
use crate::{Error, Patch, PatchState, Result, Staged, body_of};

/// Applies a [`PatchConfig`] to modules.
#[derive(Debug, Clone, Default)]
pub struct Patcher {
    config: PatchConfig,
}

impl Patcher {
    pub fn new(config: PatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    fn matcher(&self) -> Matcher {
        Matcher::new(self.config.matcher.clone()).with_shape(self.config.locator.name_shape.clone())
    }

    /// Resolves every targeted goal without changing anything.
    pub fn locate<'a>(&'a self, module: &Module) -> Vec<(&'a PatchGoal, Resolution)> {
        let locator = Locator::new(
            module,
            self.config.locator.clone(),
            self.config.matcher.clone(),
        );
        self.config
            .goals
            .iter()
            .filter(|g| !g.action.is_untargeted())
            .map(|g| (g, locator.resolve(&g.role)))
            .collect()
    }

    /// Runs every goal against `module`. The module is either fully patched and verified, or
    /// restored; the summary's `ready` flag says which.
    pub fn run(&self, module: &mut Module) -> PatchSummary {
        let snapshot = module.clone();
        let mut reports = Vec::with_capacity(self.config.goals.len());

        for goal in &self.config.goals {
            let report = self.run_goal(module, goal);
            info!(
                "{:>18} {:?} -> {}",
                goal.name,
                report.verdict,
                match &report.outcome {
                    Outcome::Applied { methods } => format!("applied ({})", methods.len()),
                    Outcome::AlreadyApplied => "already applied".to_string(),
                    Outcome::Rejected { reason } => format!("rejected: {reason}"),
                }
            );
            reports.push(report);
        }

        let mut summary = PatchSummary {
            module: module.name.clone(),
            goals: reports,
            validation_errors: Vec::new(),
            ready: true,
        };

        if let Err(errors) = validate_module(module) {
            warn!(
                "module validation failed in {} method(s); rolling back",
                errors.len()
            );
            *module = snapshot;
            let first = errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_default();
            for report in &mut summary.goals {
                if report.outcome.is_applied() {
                    report.outcome = Outcome::rejected(RejectReason::RolledBack(first.clone()));
                }
            }
            summary.validation_errors = errors.iter().map(|e| e.to_string()).collect();
            summary.ready = false;
        }
        summary
    }

    fn run_goal(&self, module: &mut Module, goal: &PatchGoal) -> GoalReport {
        let mut report = GoalReport::new(&goal.name);

        let staged = if let GoalAction::DefineFlag {
            type_name,
            property,
            value,
        } = &goal.action
        {
            report.verdict = Verdict::Found;
            report.confidence = 1.0;
            report.target = Some(format!("{type_name}.{property}"));
            DefineFlag::new(type_name.as_str(), property.as_str(), *value)
                .plan(module)
                .map(|s| s.into_iter().collect())
        } else {
            if let GoalAction::NeutralizeGuards { .. } = goal.action
                && let Some(host) = self.neutralized_host(module, goal)
            {
                debug!("{}: guard already neutralized in {}", goal.name, module.describe(host));
                report.verdict = Verdict::Found;
                report.strategy = Some(Strategy::ContentAnchor);
                report.confidence = 1.0;
                report.target = Some(module.describe(host));
                report.outcome = Outcome::AlreadyApplied;
                return report;
            }
            let Some(target) = self.locate_goal(module, goal, &mut report) else {
                return report;
            };
            self.plan_goal(module, goal, target)
        };

        let staged = match staged.and_then(|s| verify(module, &s).map(|_| s)) {
            Ok(s) => s,
            Err(e) => {
                debug!("{}: {e}", goal.name);
                report.outcome = Outcome::rejected(reason_for(e));
                return report;
            }
        };

        report.outcome = if staged.is_empty() {
            Outcome::AlreadyApplied
        } else {
            Outcome::Applied {
                methods: commit(module, staged),
            }
        };
        report
    }

    /// Fills the verdict part of `report` and returns the method to act on.
    fn locate_goal(
        &self,
        module: &Module,
        goal: &PatchGoal,
        report: &mut GoalReport,
    ) -> Option<MethodId> {
        let locator = Locator::new(
            module,
            self.config.locator.clone(),
            self.config.matcher.clone(),
        );
        match locator.resolve(&goal.role) {
            Resolution::Found {
                method,
                confidence,
                strategy,
            } => {
                report.verdict = Verdict::Found;
                report.strategy = Some(strategy);
                report.confidence = confidence;
                report.target = Some(module.describe(method));
                Some(method)
            }
            Resolution::Ambiguous {
                candidates,
                strategy,
            } => {
                report.verdict = Verdict::Ambiguous;
                report.strategy = Some(strategy);
                report.candidates = candidates.iter().map(|&c| module.describe(c)).collect();
                match (goal.on_ambiguous, candidates.first()) {
                    (OnAmbiguous::TakeTop, Some(&top)) => {
                        warn!(
                            "{}: {} candidates, taking {}",
                            goal.name,
                            candidates.len(),
                            module.describe(top)
                        );
                        report.target = Some(module.describe(top));
                        Some(top)
                    }
                    _ => {
                        report.outcome = Outcome::rejected(RejectReason::Ambiguous);
                        None
                    }
                }
            }
            Resolution::NotFound => {
                report.verdict = Verdict::NotFound;
                report.outcome = Outcome::rejected(RejectReason::NotFound);
                None
            }
        }
    }

    /// Computes the staged changes for a targeted goal; empty when already applied.
    fn plan_goal(&self, module: &Module, goal: &PatchGoal, target: MethodId) -> Result<Vec<Staged>> {
        let method = module.require_method(target)?;
        let single = |state: PatchState| match state {
            PatchState::Pending(body) => vec![Staged::Body { method: target, body }],
            PatchState::AlreadyApplied => Vec::new(),
        };

        match &goal.action {
            GoalAction::ConstantReturn { value } => {
                let op = match value {
                    Some(c) => ConstantReturn::new(c.clone()),
                    None => ConstantReturn::void(),
                };
                Ok(single(op.plan(method)?))
            }
            GoalAction::NeutralizeGuards { branch } => self.plan_guards(module, target, *branch),
            GoalAction::ExciseRegion { start, end } => {
                let matcher = self.matcher();
                let regions = ExciseRegion::find_all(body_of(method)?, start, end, &matcher);
                if regions.is_empty() {
                    // A region whose start and end coincide leaves a single nop.
                    let min_len = if start == end { 1 } else { 2 };
                    if ExciseRegion::left_behind(body_of(method)?, min_len) {
                        debug!("{}: no region left, excised run in place", goal.name);
                        return Ok(Vec::new());
                    }
                    return Err(Error::Precondition("no region matches".into()));
                }
                let mut working = method.clone();
                let mut changed = false;
                for region in regions {
                    if let PatchState::Pending(body) = region.plan(&working)? {
                        working.body = Some(body);
                        changed = true;
                    }
                }
                match (changed, working.body) {
                    (true, Some(body)) => Ok(vec![Staged::Body { method: target, body }]),
                    _ => Ok(Vec::new()),
                }
            }
            GoalAction::ReplaceOperand {
                pattern,
                mode,
                position,
                operand,
            } => {
                let found = self
                    .matcher()
                    .find_first(body_of(method)?, pattern, *mode)
                    .ok_or_else(|| Error::Precondition("pattern not found".into()))?;
                let index = *found.indices.get(*position).ok_or_else(|| {
                    Error::Precondition(format!("position {position} outside the pattern"))
                })?;
                Ok(single(ReplaceOperand::new(index, operand.clone()).plan(method)?))
            }
            GoalAction::DefineFlag { .. } => Ok(Vec::new()),
        }
    }

    /// Host of an anchor whose guard call is gone, with a neutralized site just before the
    /// anchor. Only answers when the role's names and anchor no longer resolve to anything.
    fn neutralized_host(&self, module: &Module, goal: &PatchGoal) -> Option<MethodId> {
        let spec = goal.role.anchor.as_ref()?;
        let locator = Locator::new(
            module,
            self.config.locator.clone(),
            self.config.matcher.clone(),
        );
        if !locator.exact_name(&goal.role).is_empty() || !locator.content_anchor(spec).is_empty() {
            return None;
        }
        let matcher = self.matcher();
        let anchor = InstrPredicate::string(spec.anchor.clone());
        let look_behind = self.config.matcher.look_behind;
        module.methods().into_iter().find(|&id| {
            let Some(body) = module.method(id).and_then(|m| m.body.as_ref()) else {
                return false;
            };
            let literals: Vec<&str> = body.string_literals().collect();
            spec.host_strings.iter().all(|s| literals.contains(&s.as_str()))
                && matcher
                    .positions(body, &anchor)
                    .into_iter()
                    .any(|at| neutralized_before(body, at, look_behind))
        })
    }

    /// One staged body per method that calls the guard followed by a qualifying branch.
    fn plan_guards(&self, module: &Module, guard: MethodId, branch: BranchKind) -> Result<Vec<Staged>> {
        let guard_ref = module
            .method_ref(guard)
            .ok_or_else(|| Error::Precondition(format!("{} has no reference form", module.describe(guard))))?;
        let matcher = self.matcher();
        let predicate = branch_predicate(branch == BranchKind::FalseOnly);

        let mut staged = Vec::new();
        let mut callers = 0;
        for id in module.methods() {
            let Some(method) = module.method(id) else {
                continue;
            };
            let Some(body) = method.body.as_ref() else {
                continue;
            };
            if body.callees().any(|c| *c == guard_ref) {
                callers += 1;
            }
            let sites = find_sites(body, &guard_ref, &predicate, &matcher);
            if sites.is_empty() {
                continue;
            }
            debug!("{}: {} guard site(s)", module.describe(id), sites.len());
            let op = NeutralizeGuard::new(sites, self.config.matcher.window);
            if let PatchState::Pending(body) = op.plan(method)? {
                staged.push(Staged::Body { method: id, body });
            }
        }

        if staged.is_empty() && callers > 0 {
            return Err(Error::Precondition(format!(
                "no guard sites after {callers} call(s) to {}",
                module.describe(guard)
            )));
        }
        Ok(staged)
    }
}

/// Re-verifies every staged change against the module it will be committed to.
fn verify(module: &Module, staged: &[Staged]) -> Result<()> {
    for change in staged {
        match change {
            Staged::Body { method, body } => {
                let decl = module.require_method(*method)?;
                validate_body(&module.describe(*method), body, decl.return_arity())?;
            }
            Staged::Type { decl, .. } => {
                for m in &decl.methods {
                    validate_method(&format!("{}::{}", decl.full_name(), m.name), m)?;
                }
            }
        }
    }
    Ok(())
}

/// Writes staged changes into the module and returns what changed.
fn commit(module: &mut Module, staged: Vec<Staged>) -> Vec<String> {
    let mut changed = Vec::with_capacity(staged.len());
    for change in staged {
        match change {
            Staged::Body { method, body } => {
                changed.push(module.describe(method));
                if let Some(decl) = module.method_mut(method) {
                    decl.body = Some(body);
                }
            }
            Staged::Type { index, decl } => {
                changed.push(decl.full_name());
                match index.and_then(|i| module.types.get_mut(i)) {
                    Some(slot) => *slot = decl,
                    None => module.types.push(decl),
                }
            }
        }
    }
    changed
}

fn reason_for(error: Error) -> RejectReason {
    match error {
        Error::Postcondition(v) => RejectReason::Postcondition(v.to_string()),
        Error::Precondition(msg) => RejectReason::Precondition(msg),
        other => RejectReason::Precondition(other.to_string()),
    }
}
