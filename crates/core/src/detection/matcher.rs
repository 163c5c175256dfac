//! Ordered predicate matching inside a method body.
//!
//! Two modes: contiguous (predicates match consecutive instructions) and windowed (predicates
//! match in order within `window` instructions, anything allowed in between). An anchor-relative
//! search looks for the nearest instruction satisfying a predicate within a bounded
//! look-behind/look-ahead. Nothing here mutates the body, and "no match" is an empty result.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::predicate::InstrPredicate;
use crate::detection::shape::NameShape;
use crate::module::MethodBody;

/// Distances used by the matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum span, in instructions, of a windowed match.
    pub window: usize,
    /// How far before an anchor the anchor-relative search looks.
    pub look_behind: usize,
    /// How far after an anchor the anchor-relative search looks.
    pub look_ahead: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            window: 6,
            look_behind: 20,
            look_ahead: 10,
        }
    }
}

/// Matching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Contiguous,
    Windowed,
}

/// Indices of the instructions matched by each predicate, in pattern order.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub indices: Vec<usize>,
    /// 1.0 for a contiguous match; pattern length over span for a windowed one.
    pub confidence: f64,
}

impl MatchResult {
    /// Index matched by the first predicate.
    pub fn anchor(&self) -> usize {
        self.indices[0]
    }

    /// Index matched by the last predicate.
    pub fn end(&self) -> usize {
        self.indices[self.indices.len() - 1]
    }
}

/// Predicate matcher bound to one configuration.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    pub config: MatcherConfig,
    pub shape: NameShape,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            shape: NameShape::default(),
        }
    }

    pub fn with_shape(mut self, shape: NameShape) -> Self {
        self.shape = shape;
        self
    }

    /// Indices of every instruction satisfying `predicate`.
    pub fn positions(&self, body: &MethodBody, predicate: &InstrPredicate) -> Vec<usize> {
        body.instructions
            .iter()
            .enumerate()
            .filter(|(_, ins)| predicate.matches(ins, &self.shape))
            .map(|(i, _)| i)
            .collect()
    }

    /// All matches of `pattern`, one per start index, in body order.
    pub fn find_all(
        &self,
        body: &MethodBody,
        pattern: &[InstrPredicate],
        mode: MatchMode,
    ) -> Vec<MatchResult> {
        let Some(first) = pattern.first() else {
            return Vec::new();
        };
        let mut results = Vec::new();
        for start in self.positions(body, first) {
            let found = match mode {
                MatchMode::Contiguous => self.match_contiguous(body, pattern, start),
                MatchMode::Windowed => self.match_windowed(body, pattern, start),
            };
            if let Some(m) = found {
                results.push(m);
            }
        }
        debug!(
            "matcher: {} match(es) of {} predicate(s) ({mode:?})",
            results.len(),
            pattern.len()
        );
        results
    }

    /// First match of `pattern`, if any.
    pub fn find_first(
        &self,
        body: &MethodBody,
        pattern: &[InstrPredicate],
        mode: MatchMode,
    ) -> Option<MatchResult> {
        self.find_all(body, pattern, mode).into_iter().next()
    }

    fn match_contiguous(
        &self,
        body: &MethodBody,
        pattern: &[InstrPredicate],
        start: usize,
    ) -> Option<MatchResult> {
        let window = body.instructions.get(start..start + pattern.len())?;
        window
            .iter()
            .zip(pattern)
            .all(|(ins, p)| p.matches(ins, &self.shape))
            .then(|| MatchResult {
                indices: (start..start + pattern.len()).collect(),
                confidence: 1.0,
            })
    }

    /// Greedy earliest match of each later predicate, bounded so the whole match spans at
    /// most `window` instructions.
    fn match_windowed(
        &self,
        body: &MethodBody,
        pattern: &[InstrPredicate],
        start: usize,
    ) -> Option<MatchResult> {
        let limit = start
            .saturating_add(self.config.window.max(pattern.len()))
            .min(body.len());
        let mut indices = vec![start];
        let mut cursor = start + 1;
        for predicate in &pattern[1..] {
            let hit = (cursor..limit).find(|&i| predicate.matches(&body.instructions[i], &self.shape))?;
            indices.push(hit);
            cursor = hit + 1;
        }
        let span = indices[indices.len() - 1] - start + 1;
        Some(MatchResult {
            confidence: pattern.len() as f64 / span as f64,
            indices,
        })
    }

    /// Indices within the look-behind/look-ahead bounds of `anchor` that satisfy `predicate`,
    /// nearest first; at equal distance the earlier index wins. The anchor itself is excluded.
    pub fn find_all_around(
        &self,
        body: &MethodBody,
        anchor: usize,
        predicate: &InstrPredicate,
    ) -> Vec<usize> {
        let lo = anchor.saturating_sub(self.config.look_behind);
        let hi = anchor
            .saturating_add(self.config.look_ahead)
            .min(body.len().saturating_sub(1));
        let mut hits: Vec<usize> = (lo..=hi)
            .filter(|&i| i != anchor && i < body.len())
            .filter(|&i| predicate.matches(&body.instructions[i], &self.shape))
            .collect();
        hits.sort_by_key(|&i| (i.abs_diff(anchor), i));
        hits
    }

    /// Nearest index around `anchor` satisfying `predicate`.
    pub fn find_around(
        &self,
        body: &MethodBody,
        anchor: usize,
        predicate: &InstrPredicate,
    ) -> Option<usize> {
        self.find_all_around(body, anchor, predicate).into_iter().next()
    }
}
