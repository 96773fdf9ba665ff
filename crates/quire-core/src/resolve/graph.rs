//! Sibling import graph.

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

/// Directed graph of sibling imports; edges go from importer to imported.
#[derive(Debug, Default)]
pub struct ImportGraph {
    graph: DiGraph<String, ()>,
    nodes: FxHashMap<String, NodeIndex>,
}

impl ImportGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, unit: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(unit) {
            return idx;
        }
        let idx = self.graph.add_node(unit.to_string());
        self.nodes.insert(unit.to_string(), idx);
        idx
    }

    pub fn add_import(&mut self, importer: &str, imported: &str) {
        let from = self.node(importer);
        let to = self.node(imported);
        self.graph.update_edge(from, to, ());
    }

    /// Strongly connected components with more than one unit, each sorted,
    /// in sorted order.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        use petgraph::algo::kosaraju_scc;

        let mut cycles: Vec<Vec<String>> = kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut units: Vec<String> =
                    scc.into_iter().map(|idx| self.graph[idx].clone()).collect();
                units.sort();
                units
            })
            .collect();
        cycles.sort();
        cycles
    }
}
