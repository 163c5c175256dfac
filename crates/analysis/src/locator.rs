//! Resolves a target role to a concrete method without trusting names.
//!
//! Strategies run in order and stop at the first that yields exactly one candidate:
//! 1. exact name, for builds where the names are still known (properties resolve to getters);
//! 2. content anchor, the nearest qualifying call around a literal inside a stable host method;
//! 3. structural scoring over shape, strings and the call graph.
//!
//! A strategy that yields several candidates does not decide anything on its own; if no later
//! strategy settles the role, the first such set is reported as [`Resolution::Ambiguous`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use sigpatch_core::detection::{InstrPredicate, Matcher, MatcherConfig};
use sigpatch_core::{MethodId, Module};

use crate::LocatorConfig;
use crate::callgraph::CallGraph;
use crate::scoring::{ScoreContext, ScoringRule, max_score};

/// Previously known literal names of a target. `member` may name a method or a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub type_name: String,
    pub member: String,
}

fn default_callee() -> InstrPredicate {
    InstrPredicate::bool_zero_arg_call()
}

/// Content-anchor search: host methods load every `host_strings` literal; around each load of
/// `anchor` the nearest call matching `callee` names the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorSpec {
    #[serde(default)]
    pub host_strings: Vec<String>,
    pub anchor: String,
    #[serde(default = "default_callee")]
    pub callee: InstrPredicate,
}

/// What to look for.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetRole {
    #[serde(default)]
    pub known_names: Vec<KnownName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AnchorSpec>,
    /// Overrides the configured scoring rules; an empty list disables scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<ScoringRule>>,
}

/// Which strategy produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ExactName,
    ContentAnchor,
    Structural,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::ExactName => "exact-name",
            Strategy::ContentAnchor => "content-anchor",
            Strategy::Structural => "structural",
        })
    }
}

/// Verdict for one role.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found {
        method: MethodId,
        confidence: f64,
        strategy: Strategy,
    },
    /// Candidates in preference order.
    Ambiguous {
        candidates: Vec<MethodId>,
        strategy: Strategy,
    },
    NotFound,
}

impl Resolution {
    /// The method a `Found` verdict names.
    pub fn found(&self) -> Option<MethodId> {
        match self {
            Resolution::Found { method, .. } => Some(*method),
            _ => None,
        }
    }
}

/// Locator over one module. Builds the call graph once.
pub struct Locator<'m> {
    module: &'m Module,
    config: LocatorConfig,
    matcher: Matcher,
    callgraph: CallGraph,
}

impl<'m> Locator<'m> {
    pub fn new(module: &'m Module, config: LocatorConfig, matcher: MatcherConfig) -> Self {
        let matcher = Matcher::new(matcher).with_shape(config.name_shape.clone());
        Self {
            callgraph: CallGraph::build(module),
            module,
            config,
            matcher,
        }
    }

    pub fn callgraph(&self) -> &CallGraph {
        &self.callgraph
    }

    pub fn resolve(&self, role: &TargetRole) -> Resolution {
        let mut ambiguous: Option<Resolution> = None;

        let exact = self.exact_name(role);
        if let Some(r) = settle(exact, Strategy::ExactName, &mut ambiguous) {
            return r;
        }

        if let Some(anchor) = &role.anchor {
            let anchored = self.content_anchor(anchor);
            if let Some(r) = settle(anchored, Strategy::ContentAnchor, &mut ambiguous) {
                return r;
            }
        }

        let rules = role.rules.as_deref().unwrap_or(&self.config.rules);
        if !rules.is_empty() {
            match self.structural(rules) {
                r @ Resolution::Found { .. } => return r,
                r @ Resolution::Ambiguous { .. } => {
                    ambiguous.get_or_insert(r);
                }
                Resolution::NotFound => {}
            }
        }

        ambiguous.unwrap_or(Resolution::NotFound)
    }

    /// Methods named by the role's known names; a property resolves to its getter.
    pub fn exact_name(&self, role: &TargetRole) -> Vec<MethodId> {
        let mut out = Vec::new();
        for known in &role.known_names {
            for id in self.module.methods() {
                let Some(ty) = self.module.declaring_type(id) else {
                    continue;
                };
                if ty.name != known.type_name
                    || known.namespace.as_ref().is_some_and(|ns| *ns != ty.namespace)
                {
                    continue;
                }
                let Some(method) = self.module.method(id) else {
                    continue;
                };
                let getter = match id.nested {
                    None => self.module.types[id.ty]
                        .property(&known.member)
                        .and_then(|p| p.getter.as_deref()),
                    Some(_) => None,
                };
                if (method.name == known.member || getter == Some(method.name.as_str()))
                    && !out.contains(&id)
                {
                    out.push(id);
                }
            }
        }
        debug!("exact-name: {} candidate(s)", out.len());
        out
    }

    /// Distinct module methods called nearest to each anchor literal inside host methods.
    pub fn content_anchor(&self, spec: &AnchorSpec) -> Vec<MethodId> {
        let anchor = InstrPredicate::string(spec.anchor.clone());
        let mut out = Vec::new();
        for host in self.module.methods() {
            let Some(body) = self.module.method(host).and_then(|m| m.body.as_ref()) else {
                continue;
            };
            let literals: Vec<&str> = body.string_literals().collect();
            if !spec.host_strings.iter().all(|s| literals.contains(&s.as_str())) {
                continue;
            }
            for at in self.matcher.positions(body, &anchor) {
                let callee = self
                    .matcher
                    .find_all_around(body, at, &spec.callee)
                    .into_iter()
                    .filter_map(|i| body.instructions[i].method_ref())
                    .find_map(|r| self.module.resolve_method(r));
                if let Some(id) = callee
                    && !out.contains(&id)
                {
                    debug!(
                        "content-anchor: {} -> {}",
                        self.module.describe(host),
                        self.module.describe(id)
                    );
                    out.push(id);
                }
            }
        }
        out
    }

    /// Ranks every method with a body and applies `min_score` and `tie_tolerance`.
    pub fn structural(&self, rules: &[ScoringRule]) -> Resolution {
        let ctx = ScoreContext {
            module: self.module,
            callgraph: &self.callgraph,
            shape: &self.config.name_shape,
            body_size: self.config.body_size,
        };
        let ranked = ctx.rank(rules, self.config.min_score);
        let Some(top) = ranked.first() else {
            return Resolution::NotFound;
        };
        let tied: Vec<MethodId> = ranked
            .iter()
            .take_while(|c| top.score - c.score <= self.config.tie_tolerance)
            .map(|c| c.method)
            .collect();
        if tied.len() > 1 {
            info!(
                "structural: {} candidates tied at {:.2}",
                tied.len(),
                top.score
            );
            return Resolution::Ambiguous {
                candidates: tied,
                strategy: Strategy::Structural,
            };
        }
        let max = max_score(rules);
        let confidence = if max > 0.0 {
            (top.score / max).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Resolution::Found {
            method: top.method,
            confidence,
            strategy: Strategy::Structural,
        }
    }
}

/// `Some(Found)` for exactly one candidate; remembers the first multi-candidate set.
fn settle(
    candidates: Vec<MethodId>,
    strategy: Strategy,
    ambiguous: &mut Option<Resolution>,
) -> Option<Resolution> {
    match candidates.len() {
        0 => None,
        1 => Some(Resolution::Found {
            method: candidates[0],
            confidence: 1.0,
            strategy,
        }),
        _ => {
            ambiguous.get_or_insert(Resolution::Ambiguous {
                candidates,
                strategy,
            });
            None
        }
    }
}
