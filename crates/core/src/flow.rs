//! Basic-block flow graph of a method body.
//!
//! Blocks are maximal straight-line index ranges. A new block starts at the entry, at every
//! branch/switch/leave target, right after any instruction that does not simply fall through,
//! and at exception-region boundaries. Edges are labelled with how control moves along them so
//! the verifier can apply the right entry depth (a `leave` empties the stack, a catch handler
//! starts with the exception object).

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use std::collections::{BTreeSet, HashSet};

use crate::instruction::InstrId;
use crate::module::MethodBody;
use crate::opcode::FlowControl;

/// Half-open instruction index range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub start: usize,
    pub end: usize,
}

impl BasicBlock {
    #[inline]
    pub fn last(&self) -> usize {
        self.end - 1
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        (self.start..self.end).contains(&index)
    }
}

/// How control moves along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Falls into the next block.
    Fallthrough,
    /// Taken branch or switch case.
    Branch,
    /// `leave` to its target; the stack is emptied.
    Leave,
    /// From a protected block to its handler, entered with the given depth.
    Handler(usize),
}

/// Exception region resolved to index ranges (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRegion {
    pub try_range: (usize, usize),
    pub handler_range: (usize, usize),
    pub entry_depth: usize,
}

/// Basic-block graph of one body plus the problems found while resolving ids.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub graph: DiGraph<BasicBlock, EdgeKind>,
    pub entry: Option<NodeIndex>,
    /// `(index, target)` for every branch operand that names no instruction.
    pub dangling_targets: Vec<(usize, InstrId)>,
    /// Region boundary ids that name no instruction.
    pub dangling_regions: Vec<InstrId>,
    pub regions: Vec<ResolvedRegion>,
    block_of: Vec<NodeIndex>,
}

impl FlowGraph {
    /// Builds the graph for `body`. Dangling ids are recorded, never followed.
    pub fn build(body: &MethodBody) -> Self {
        let len = body.len();
        let mut dangling_targets = Vec::new();
        let mut dangling_regions = Vec::new();
        let mut regions = Vec::new();

        for region in &body.regions {
            let resolved: Vec<Option<usize>> =
                region.ids().iter().map(|id| body.index_of(*id)).collect();
            match resolved.as_slice() {
                [Some(ts), Some(te), Some(hs), Some(he)] if ts <= te && hs <= he => {
                    regions.push(ResolvedRegion {
                        try_range: (*ts, *te),
                        handler_range: (*hs, *he),
                        entry_depth: region.handler.entry_depth(),
                    });
                }
                _ => {
                    for (id, idx) in region.ids().iter().zip(&resolved) {
                        if idx.is_none() {
                            dangling_regions.push(*id);
                        }
                    }
                    if resolved.iter().all(Option::is_some) {
                        // Inverted range: report its start.
                        dangling_regions.push(region.try_start);
                    }
                }
            }
        }

        // Leaders.
        let mut leaders = BTreeSet::new();
        if len > 0 {
            leaders.insert(0);
        }
        for (idx, ins) in body.instructions.iter().enumerate() {
            for target in ins.targets() {
                match body.index_of(target) {
                    Some(t) => {
                        leaders.insert(t);
                    }
                    None => dangling_targets.push((idx, target)),
                }
            }
            if !matches!(ins.opcode.flow(), FlowControl::Next) && idx + 1 < len {
                leaders.insert(idx + 1);
            }
        }
        for r in &regions {
            for boundary in [r.try_range.0, r.try_range.1 + 1, r.handler_range.0, r.handler_range.1 + 1] {
                if boundary < len {
                    leaders.insert(boundary);
                }
            }
        }

        let mut graph = DiGraph::new();
        let mut block_of = Vec::with_capacity(len);
        let starts: Vec<usize> = leaders.into_iter().collect();
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(len);
            let node = graph.add_node(BasicBlock { start, end });
            block_of.extend(std::iter::repeat_n(node, end - start));
        }

        let nodes: Vec<NodeIndex> = graph.node_indices().collect();
        for (pos, &node) in nodes.iter().enumerate() {
            let block = graph[node];
            let last = &body.instructions[block.last()];
            let next = nodes.get(pos + 1).copied();
            let mut edges: Vec<(NodeIndex, EdgeKind)> = Vec::new();
            let target_nodes = last
                .targets()
                .into_iter()
                .filter_map(|t| body.index_of(t))
                .map(|t| block_of[t]);
            match last.opcode.flow() {
                FlowControl::Next => edges.extend(next.map(|n| (n, EdgeKind::Fallthrough))),
                FlowControl::Branch => edges.extend(target_nodes.map(|n| (n, EdgeKind::Branch))),
                FlowControl::CondBranch | FlowControl::Switch => {
                    edges.extend(target_nodes.map(|n| (n, EdgeKind::Branch)));
                    edges.extend(next.map(|n| (n, EdgeKind::Fallthrough)));
                }
                FlowControl::Leave => edges.extend(target_nodes.map(|n| (n, EdgeKind::Leave))),
                FlowControl::Return | FlowControl::Throw | FlowControl::EndFinally => {}
            }
            for r in &regions {
                if block.start == r.try_range.0 {
                    edges.push((block_of[r.handler_range.0], EdgeKind::Handler(r.entry_depth)));
                }
            }
            let mut seen = HashSet::new();
            for (to, kind) in edges {
                if seen.insert((to, kind)) {
                    graph.add_edge(node, to, kind);
                }
            }
        }

        Self {
            graph,
            entry: nodes.first().copied(),
            dangling_targets,
            dangling_regions,
            regions,
            block_of,
        }
    }

    /// Block containing instruction `index`.
    pub fn block_at(&self, index: usize) -> Option<NodeIndex> {
        self.block_of.get(index).copied()
    }

    pub fn block(&self, node: NodeIndex) -> BasicBlock {
        self.graph[node]
    }

    /// Outgoing edges of a block.
    pub fn successors(&self, node: NodeIndex) -> Vec<(NodeIndex, EdgeKind)> {
        let mut out: Vec<_> = self
            .graph
            .edges(node)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        // petgraph yields edges newest first.
        out.reverse();
        out
    }

    /// Blocks reachable from the entry.
    pub fn reachable(&self) -> HashSet<NodeIndex> {
        let mut seen = HashSet::new();
        if let Some(entry) = self.entry {
            let mut dfs = Dfs::new(&self.graph, entry);
            while let Some(node) = dfs.next(&self.graph) {
                seen.insert(node);
            }
        }
        seen
    }

    /// True when instruction `index` lies on some path from the entry.
    pub fn is_reachable(&self, index: usize) -> bool {
        self.block_at(index)
            .is_some_and(|node| self.reachable().contains(&node))
    }

    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }
}
