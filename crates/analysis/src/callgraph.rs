//! Call graph over the methods defined in a module.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use sigpatch_core::{MethodId, Module};

/// Directed caller → callee graph. Calls to methods outside the module are not represented.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    graph: DiGraph<MethodId, ()>,
    nodes: HashMap<MethodId, NodeIndex>,
}

impl CallGraph {
    pub fn build(module: &Module) -> Self {
        let mut cg = Self::default();
        let methods = module.methods();
        for &id in &methods {
            let node = cg.graph.add_node(id);
            cg.nodes.insert(id, node);
        }
        for &caller in &methods {
            let Some(body) = module.method(caller).and_then(|m| m.body.as_ref()) else {
                continue;
            };
            for callee in body.callees().filter_map(|r| module.resolve_method(r)) {
                let (from, to) = (cg.nodes[&caller], cg.nodes[&callee]);
                if cg.graph.find_edge(from, to).is_none() {
                    cg.graph.add_edge(from, to, ());
                }
            }
        }
        tracing::debug!(
            "call graph: {} methods, {} edges",
            cg.graph.node_count(),
            cg.graph.edge_count()
        );
        cg
    }

    fn neighbors(&self, id: MethodId, dir: Direction) -> Vec<MethodId> {
        let Some(&node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<MethodId> = self
            .graph
            .neighbors_directed(node, dir)
            .map(|n| self.graph[n])
            .collect();
        out.sort();
        out
    }

    /// Distinct methods calling `id`, sorted.
    pub fn callers(&self, id: MethodId) -> Vec<MethodId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Distinct module methods called by `id`, sorted.
    pub fn callees(&self, id: MethodId) -> Vec<MethodId> {
        self.neighbors(id, Direction::Outgoing)
    }

    pub fn caller_count(&self, id: MethodId) -> usize {
        self.nodes
            .get(&id)
            .map(|&n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .unwrap_or(0)
    }
}
