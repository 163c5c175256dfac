//! Structural scoring: an ordered list of `(predicate, weight)` rules evaluated per method.
//!
//! A method's score is the sum of the weights of the rules it satisfies. Only methods with a
//! body are scored. Candidates are ranked by score, highest first, ties broken by
//! [`MethodId`] so the ranking is deterministic.

use serde::{Deserialize, Serialize};

use sigpatch_core::detection::NameShape;
use sigpatch_core::{MethodId, Module};

use crate::callgraph::CallGraph;

/// Property of a method a scoring rule tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePredicate {
    /// `static bool M()`.
    BoolZeroArgStatic,
    /// Declaring type name matches the obfuscated-name shape.
    TypeNameShape,
    /// Method name matches the obfuscated-name shape.
    MethodNameShape,
    /// Instruction count within the configured body-size range.
    BodySizeInRange,
    /// Calls some method whose name contains `fragment`.
    CallsNameContaining { fragment: String },
    /// Loads the string literal `value`.
    ContainsString { value: String },
    /// Called from some method that loads the string literal `value`.
    CalledFromStringHost { value: String },
    /// Has at least `count` distinct callers.
    MinCallers { count: usize },
}

/// One weighted rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRule {
    pub predicate: RulePredicate,
    pub weight: f64,
}

impl ScoringRule {
    pub fn new(predicate: RulePredicate, weight: f64) -> Self {
        Self { predicate, weight }
    }
}

/// Shape rules used when a role brings none of its own.
pub fn default_rules() -> Vec<ScoringRule> {
    vec![
        ScoringRule::new(RulePredicate::BoolZeroArgStatic, 5.0),
        ScoringRule::new(RulePredicate::TypeNameShape, 3.0),
        ScoringRule::new(RulePredicate::MethodNameShape, 3.0),
        ScoringRule::new(RulePredicate::BodySizeInRange, 1.0),
    ]
}

/// Highest score a method can reach under `rules`.
pub fn max_score(rules: &[ScoringRule]) -> f64 {
    rules.iter().map(|r| r.weight.max(0.0)).sum()
}

/// A scored method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub method: MethodId,
    pub score: f64,
}

/// Everything a rule may look at.
pub struct ScoreContext<'a> {
    pub module: &'a Module,
    pub callgraph: &'a CallGraph,
    pub shape: &'a NameShape,
    pub body_size: (usize, usize),
}

impl ScoreContext<'_> {
    fn holds(&self, id: MethodId, predicate: &RulePredicate) -> bool {
        let Some(method) = self.module.method(id) else {
            return false;
        };
        let body = method.body.as_ref();
        match predicate {
            RulePredicate::BoolZeroArgStatic => method.is_bool_accessor(),
            RulePredicate::TypeNameShape => self
                .module
                .declaring_type(id)
                .is_some_and(|t| self.shape.matches(type_leaf(&t.name))),
            RulePredicate::MethodNameShape => self.shape.matches(&method.name),
            RulePredicate::BodySizeInRange => body.is_some_and(|b| {
                let (lo, hi) = self.body_size;
                (lo..=hi).contains(&b.len())
            }),
            RulePredicate::CallsNameContaining { fragment } => {
                body.is_some_and(|b| b.callees().any(|c| c.name.contains(fragment.as_str())))
            }
            RulePredicate::ContainsString { value } => {
                body.is_some_and(|b| b.string_literals().any(|s| s == value))
            }
            RulePredicate::CalledFromStringHost { value } => {
                self.callgraph.callers(id).into_iter().any(|caller| {
                    self.module
                        .method(caller)
                        .and_then(|m| m.body.as_ref())
                        .is_some_and(|b| b.string_literals().any(|s| s == value))
                })
            }
            RulePredicate::MinCallers { count } => self.callgraph.caller_count(id) >= *count,
        }
    }

    /// Sum of the weights of the rules `id` satisfies.
    pub fn score(&self, id: MethodId, rules: &[ScoringRule]) -> f64 {
        rules
            .iter()
            .filter(|r| self.holds(id, &r.predicate))
            .map(|r| r.weight)
            .sum()
    }

    /// Every method with a body scoring at least `min_score`, best first.
    pub fn rank(&self, rules: &[ScoringRule], min_score: f64) -> Vec<Candidate> {
        let mut ranked: Vec<Candidate> = self
            .module
            .methods()
            .into_iter()
            .filter(|&id| self.module.method(id).is_some_and(|m| m.has_body()))
            .map(|id| Candidate {
                method: id,
                score: self.score(id, rules),
            })
            .filter(|c| c.score >= min_score)
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.method.cmp(&b.method)));
        ranked
    }
}

/// State-machine types are named `Outer/Inner`; the shape applies to the innermost name.
fn type_leaf(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
