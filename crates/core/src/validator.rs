//! Structural verifier for method bodies.
//!
//! Simulates the evaluation-stack depth over the [`FlowGraph`] of a body. Along every reachable
//! path the depth must never go negative, must agree at every join point, must equal the
//! method's return arity at `ret`, and must be zero on entry to a protected range. Every branch
//! target and region boundary must name an instruction of the same body, and no path may run
//! past the last instruction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use petgraph::graph::NodeIndex;
use thiserror::Error;
use tracing::debug;

use crate::flow::{EdgeKind, FlowGraph};
use crate::instruction::InstrId;
use crate::module::{MethodBody, MethodDecl, Module};
use crate::opcode::{FlowControl, Opcode};

/// One verifier finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// An instruction pops more values than the stack holds.
    Underflow { id: InstrId, depth: usize, pops: usize },
    /// Two paths reach the same instruction with different depths.
    JoinMismatch { id: InstrId, expected: usize, found: usize },
    /// A branch operand names an instruction that is not in the body.
    DanglingTarget { id: InstrId, target: InstrId },
    /// An exception region boundary names an instruction that is not in the body.
    DanglingRegion { id: InstrId },
    /// Control runs past the last instruction.
    FallsOffEnd,
    /// `ret` sees a depth other than the return arity.
    ReturnDepth { id: InstrId, expected: usize, found: usize },
    /// A protected range is entered with a non-empty stack.
    TryEntryDepth { id: InstrId, depth: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Underflow { id, depth, pops } => {
                write!(f, "stack underflow at {id}: depth {depth}, pops {pops}")
            }
            Violation::JoinMismatch { id, expected, found } => {
                write!(f, "join mismatch at {id}: {expected} vs {found}")
            }
            Violation::DanglingTarget { id, target } => {
                write!(f, "branch at {id} targets missing {target}")
            }
            Violation::DanglingRegion { id } => write!(f, "exception region names missing {id}"),
            Violation::FallsOffEnd => f.write_str("control falls off the end of the body"),
            Violation::ReturnDepth { id, expected, found } => {
                write!(f, "ret at {id} with depth {found}, expected {expected}")
            }
            Violation::TryEntryDepth { id, depth } => {
                write!(f, "protected range at {id} entered with depth {depth}")
            }
        }
    }
}

/// Verifier failure for one method.
#[derive(Debug, Clone, Error)]
#[error("{method}: {}", render(.violations))]
pub struct ValidationError {
    pub method: String,
    pub violations: Vec<Violation>,
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Verifies `body` for a method whose return type occupies `return_arity` stack slots.
/// Returns every violation found; an empty list means the body verifies.
pub fn check_body(body: &MethodBody, return_arity: usize) -> Vec<Violation> {
    let mut violations = Vec::new();
    if body.is_empty() {
        violations.push(Violation::FallsOffEnd);
        return violations;
    }

    let flow = FlowGraph::build(body);
    for (idx, target) in &flow.dangling_targets {
        violations.push(Violation::DanglingTarget {
            id: body.instructions[*idx].id,
            target: *target,
        });
    }
    for id in &flow.dangling_regions {
        violations.push(Violation::DanglingRegion { id: *id });
    }

    let Some(entry) = flow.entry else {
        return violations;
    };

    let try_starts: HashSet<usize> = flow.regions.iter().map(|r| r.try_range.0).collect();

    let mut depth_at: HashMap<NodeIndex, usize> = HashMap::new();
    let mut queue = VecDeque::new();
    depth_at.insert(entry, 0);
    queue.push_back(entry);

    while let Some(node) = queue.pop_front() {
        let block = flow.block(node);
        let mut depth = depth_at[&node];

        if try_starts.contains(&block.start) && depth != 0 {
            violations.push(Violation::TryEntryDepth {
                id: body.instructions[block.start].id,
                depth,
            });
        }

        let mut broken = false;
        for idx in block.start..block.end {
            let ins = &body.instructions[idx];
            let effect = ins.stack_effect(return_arity);
            if ins.opcode == Opcode::Ret && depth != return_arity {
                violations.push(Violation::ReturnDepth {
                    id: ins.id,
                    expected: return_arity,
                    found: depth,
                });
                broken = true;
                break;
            }
            if effect.pops > depth {
                violations.push(Violation::Underflow {
                    id: ins.id,
                    depth,
                    pops: effect.pops,
                });
                broken = true;
                break;
            }
            depth = depth - effect.pops + effect.pushes;
        }
        if broken {
            continue;
        }

        let last = &body.instructions[block.last()];
        let falls_through = matches!(
            last.opcode.flow(),
            FlowControl::Next | FlowControl::CondBranch | FlowControl::Switch
        );
        if falls_through && block.end == body.len() {
            violations.push(Violation::FallsOffEnd);
        }

        for (succ, kind) in flow.successors(node) {
            let incoming = match kind {
                EdgeKind::Fallthrough | EdgeKind::Branch => depth,
                EdgeKind::Leave => 0,
                EdgeKind::Handler(d) => d,
            };
            match depth_at.get(&succ) {
                Some(&known) if known != incoming => {
                    violations.push(Violation::JoinMismatch {
                        id: body.instructions[flow.block(succ).start].id,
                        expected: known,
                        found: incoming,
                    });
                }
                Some(_) => {}
                None => {
                    depth_at.insert(succ, incoming);
                    queue.push_back(succ);
                }
            }
        }
    }

    violations.dedup();
    violations
}

/// Verifies the body of `method`, if it has one.
pub fn validate_method(name: &str, method: &MethodDecl) -> Result<(), ValidationError> {
    let Some(body) = &method.body else {
        return Ok(());
    };
    validate_body(name, body, method.return_arity())
}

/// Verifies a body and wraps any violations into a [`ValidationError`].
pub fn validate_body(name: &str, body: &MethodBody, return_arity: usize) -> Result<(), ValidationError> {
    let violations = check_body(body, return_arity);
    if violations.is_empty() {
        Ok(())
    } else {
        debug!("{name}: {} violation(s)", violations.len());
        Err(ValidationError {
            method: name.to_string(),
            violations,
        })
    }
}

/// Verifies every body in the module, state-machine methods included.
pub fn validate_module(module: &Module) -> Result<(), Vec<ValidationError>> {
    let errors: Vec<ValidationError> = module
        .methods()
        .into_iter()
        .filter_map(|id| {
            let method = module.method(id)?;
            validate_method(&module.describe(id), method).err()
        })
        .collect();
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
