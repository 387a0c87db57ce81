use std::collections::BTreeSet;

use crate::component::{ComponentId, ComponentTree};
use crate::error::{Error, Result};

/// "Must complete before" edges over every non-root component.
///
/// Edges come from three places:
/// - explicit `needs` entries (`dependency -> dependent`);
/// - nesting: every child completes before its parent, so depending on a
///   grouping node means waiting for its whole subtree;
/// - inheritance: an ancestor's `needs` also gate each of its descendants.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// `prerequisites[n]` are the components that must finish before `n` starts.
    prerequisites: Vec<BTreeSet<ComponentId>>,
    /// Inverse of `prerequisites`.
    dependents: Vec<BTreeSet<ComponentId>>,
    vertices: Vec<ComponentId>,
}

impl DependencyGraph {
    pub fn build(tree: &ComponentTree) -> Result<Self> {
        let size = tree.len();
        let mut graph = Self {
            prerequisites: vec![BTreeSet::new(); size],
            dependents: vec![BTreeSet::new(); size],
            vertices: tree.components().map(|node| node.id).collect(),
        };

        // Resolve every declared need up front so unknown identities fail
        // regardless of where they are inherited.
        let mut resolved_needs: Vec<Vec<ComponentId>> = vec![Vec::new(); size];
        for node in tree.components() {
            for need in &node.needs {
                let target = tree
                    .resolve_need(node.id, need)
                    .ok_or_else(|| Error::dependency_unknown(&node.identity, need))?;
                resolved_needs[node.id.index()].push(target);
            }
        }

        for node in tree.components() {
            for &target in &resolved_needs[node.id.index()] {
                graph.add_edge(target, node.id);
            }

            // An ancestor's need on `node` itself, or on something between
            // `node` and that ancestor, already completes after `node`.
            for ancestor in tree.ancestors(node.id) {
                for &target in &resolved_needs[ancestor.index()] {
                    if target != node.id && !tree.ancestors(node.id).any(|a| a == target) {
                        graph.add_edge(target, node.id);
                    }
                }
            }

            if let Some(parent) = node.parent {
                if parent != tree.root() {
                    graph.add_edge(node.id, parent);
                }
            }
        }

        tracing::debug!(
            vertices = graph.vertices.len(),
            edges = graph.edge_count(),
            "built dependency graph"
        );
        Ok(graph)
    }

    fn add_edge(&mut self, before: ComponentId, after: ComponentId) {
        self.prerequisites[after.index()].insert(before);
        self.dependents[before.index()].insert(after);
    }

    pub fn vertices(&self) -> &[ComponentId] {
        &self.vertices
    }

    pub fn prerequisites(&self, id: ComponentId) -> &BTreeSet<ComponentId> {
        &self.prerequisites[id.index()]
    }

    pub fn dependents(&self, id: ComponentId) -> &BTreeSet<ComponentId> {
        &self.dependents[id.index()]
    }

    pub fn edge_count(&self) -> usize {
        self.prerequisites.iter().map(BTreeSet::len).sum()
    }

    /// Every component that transitively depends on `id`.
    pub fn transitive_dependents(&self, id: ComponentId) -> BTreeSet<ComponentId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<ComponentId> = self.dependents(id).iter().copied().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.dependents(next).iter().copied());
            }
        }
        seen
    }
}
