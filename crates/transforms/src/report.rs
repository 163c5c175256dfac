//! Per-goal verdicts and the run summary handed to the caller.

use serde::Serialize;
use std::fmt;

use sigpatch_analysis::Strategy;

/// How the goal's target was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Found,
    Ambiguous,
    NotFound,
}

/// Why a goal produced no change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    Ambiguous,
    NotFound,
    Precondition(String),
    Postcondition(String),
    /// The goal applied, but the run was rolled back.
    RolledBack(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Ambiguous => f.write_str("target is ambiguous"),
            RejectReason::NotFound => f.write_str("target not found"),
            RejectReason::Precondition(msg) => write!(f, "precondition: {msg}"),
            RejectReason::Postcondition(msg) => write!(f, "postcondition: {msg}"),
            RejectReason::RolledBack(msg) => write!(f, "rolled back: {msg}"),
        }
    }
}

/// What happened to the module for one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Methods (or types) changed by the goal.
    Applied { methods: Vec<String> },
    AlreadyApplied,
    Rejected { reason: RejectReason },
}

impl Outcome {
    pub fn rejected(reason: RejectReason) -> Self {
        Outcome::Rejected { reason }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected { .. })
    }
}

/// Report for one goal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalReport {
    pub goal: String,
    pub verdict: Verdict,
    /// Method the goal acted on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    pub confidence: f64,
    /// Competing candidates for an ambiguous verdict, in preference order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
    pub outcome: Outcome,
}

impl GoalReport {
    pub(crate) fn new(goal: &str) -> Self {
        Self {
            goal: goal.to_string(),
            verdict: Verdict::NotFound,
            target: None,
            strategy: None,
            confidence: 0.0,
            candidates: Vec::new(),
            outcome: Outcome::rejected(RejectReason::NotFound),
        }
    }
}

/// Result of a patch run over one module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchSummary {
    pub module: String,
    pub goals: Vec<GoalReport>,
    /// Module-level verification failures, one line per method.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
    /// True when the patched module verified and may be written.
    pub ready: bool,
}

impl PatchSummary {
    pub fn applied(&self) -> usize {
        self.goals.iter().filter(|g| g.outcome.is_applied()).count()
    }

    pub fn rejected(&self) -> usize {
        self.goals.iter().filter(|g| g.outcome.is_rejected()).count()
    }

    /// True when at least one goal changed the module.
    pub fn changed(&self) -> bool {
        self.applied() > 0
    }
}
