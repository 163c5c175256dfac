//! Goal configuration: which role to locate and what to do with it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use sigpatch_analysis::{LocatorConfig, TargetRole};
use sigpatch_core::detection::{InstrPredicate, MatchMode, MatcherConfig};
use sigpatch_core::Operand;

use crate::constant_return::Constant;
use crate::{Error, Result};

/// Which conditional branches count as guard branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    /// Only `brfalse`: the guarded code runs when the check passes.
    #[default]
    FalseOnly,
    /// `brtrue` or `brfalse`.
    Any,
}

/// What to do with a located target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalAction {
    /// Make the target return `value`; omit for a `void` method.
    ConstantReturn {
        #[serde(default)]
        value: Option<Constant>,
    },
    /// The target is a check method; neutralize the branch after every call to it.
    NeutralizeGuards {
        #[serde(default)]
        branch: BranchKind,
    },
    /// Nop out every `start`..`end` run in the target.
    ExciseRegion {
        start: InstrPredicate,
        end: InstrPredicate,
    },
    /// Replace the operand of the instruction matched by `pattern[position]`, first match only.
    ReplaceOperand {
        pattern: Vec<InstrPredicate>,
        #[serde(default)]
        mode: MatchMode,
        #[serde(default)]
        position: usize,
        operand: Operand,
    },
    /// Define a constant static bool property; needs no target.
    DefineFlag {
        type_name: String,
        property: String,
        #[serde(default = "default_flag_value")]
        value: bool,
    },
}

fn default_flag_value() -> bool {
    true
}

impl GoalAction {
    /// True when the action works without a located target.
    pub fn is_untargeted(&self) -> bool {
        matches!(self, GoalAction::DefineFlag { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            GoalAction::ConstantReturn { .. } => "constant_return",
            GoalAction::NeutralizeGuards { .. } => "neutralize_guards",
            GoalAction::ExciseRegion { .. } => "excise_region",
            GoalAction::ReplaceOperand { .. } => "replace_operand",
            GoalAction::DefineFlag { .. } => "define_flag",
        }
    }
}

/// Policy for an ambiguous locator verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnAmbiguous {
    #[default]
    Reject,
    /// Proceed with the top candidate and keep the ambiguous verdict in the report.
    TakeTop,
}

/// A named patch goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchGoal {
    pub name: String,
    #[serde(default)]
    pub role: TargetRole,
    pub action: GoalAction,
    #[serde(default)]
    pub on_ambiguous: OnAmbiguous,
}

/// Configuration for a patch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PatchConfig {
    pub matcher: MatcherConfig,
    pub locator: LocatorConfig,
    pub goals: Vec<PatchGoal>,
}

impl PatchConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| sigpatch_core::result::Error::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.locator.validate()?;
        if self.matcher.window < 2 {
            return Err(Error::Config(format!(
                "matcher window {} cannot hold a call and a branch",
                self.matcher.window
            )));
        }
        let mut names = HashSet::new();
        for goal in &self.goals {
            if goal.name.is_empty() {
                return Err(Error::Config("goal with an empty name".into()));
            }
            if !names.insert(goal.name.as_str()) {
                return Err(Error::Config(format!("duplicate goal {}", goal.name)));
            }
            match &goal.action {
                GoalAction::ReplaceOperand {
                    pattern, position, ..
                } if *position >= pattern.len() => {
                    return Err(Error::Config(format!(
                        "{}: position {position} outside a pattern of {}",
                        goal.name,
                        pattern.len()
                    )));
                }
                GoalAction::DefineFlag { type_name, property, .. }
                    if type_name.is_empty() || property.is_empty() =>
                {
                    return Err(Error::Config(format!("{}: empty flag name", goal.name)));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
