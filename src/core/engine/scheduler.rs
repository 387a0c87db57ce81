use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::component::{ComponentId, ComponentTree};
use crate::error::{Error, Result};

use super::graph::DependencyGraph;

/// Ordered batches; components within a batch have no ordering dependency on
/// each other and may run in parallel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    batches: Vec<Vec<ComponentId>>,
}

impl ExecutionPlan {
    pub fn batches(&self) -> &[Vec<ComponentId>] {
        &self.batches
    }

    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn view(&self, tree: &ComponentTree) -> PlanView {
        PlanView {
            batches: self
                .batches
                .iter()
                .map(|batch| {
                    batch
                        .iter()
                        .map(|id| {
                            let node = tree.get(*id);
                            PlannedComponent {
                                id: node.identity.clone(),
                                action: node.action.kind().to_string(),
                                dir: node.dir.clone(),
                                needs: node.needs.clone(),
                            }
                        })
                        .collect()
                })
                .collect(),
            total_components: self.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub batches: Vec<Vec<PlannedComponent>>,
    pub total_components: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedComponent {
    pub id: String,
    pub action: String,
    pub dir: PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
}

/// Layer the graph with Kahn's algorithm.
///
/// Batch `i` holds exactly the components whose prerequisites all sit in
/// batches `0..i`. Batches are sorted by identity.
pub fn plan(tree: &ComponentTree, graph: &DependencyGraph) -> Result<ExecutionPlan> {
    let mut indegree = vec![0usize; tree.len()];
    for &id in graph.vertices() {
        indegree[id.index()] = graph.prerequisites(id).len();
    }

    let by_identity = |a: &ComponentId, b: &ComponentId| {
        tree.get(*a).identity.cmp(&tree.get(*b).identity)
    };

    let mut current: Vec<ComponentId> = graph
        .vertices()
        .iter()
        .copied()
        .filter(|id| indegree[id.index()] == 0)
        .collect();
    current.sort_by(by_identity);

    let mut batches = Vec::new();
    let mut scheduled = 0usize;
    while !current.is_empty() {
        let mut next = Vec::new();
        for &id in &current {
            for &dependent in graph.dependents(id) {
                indegree[dependent.index()] -= 1;
                if indegree[dependent.index()] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_by(by_identity);
        scheduled += current.len();
        batches.push(std::mem::replace(&mut current, next));
    }

    if scheduled != graph.vertices().len() {
        let pending: BTreeSet<ComponentId> = graph
            .vertices()
            .iter()
            .copied()
            .filter(|id| indegree[id.index()] > 0)
            .collect();
        return Err(Error::dependency_cycle(find_cycle(tree, graph, &pending)));
    }

    tracing::debug!(batches = batches.len(), components = scheduled, "planned execution");
    Ok(ExecutionPlan { batches })
}

/// Walk "needs" edges among components Kahn could not schedule until one repeats.
///
/// Every pending component has at least one pending prerequisite, so the walk
/// always closes a loop. The returned path starts and ends on the same identity.
fn find_cycle(
    tree: &ComponentTree,
    graph: &DependencyGraph,
    pending: &BTreeSet<ComponentId>,
) -> Vec<String> {
    let mut path: Vec<ComponentId> = Vec::new();
    let mut current = smallest_identity(tree, pending.iter().copied());

    while let Some(id) = current {
        if let Some(start) = path.iter().position(|seen| *seen == id) {
            let mut cycle: Vec<String> = path[start..]
                .iter()
                .map(|id| tree.get(*id).identity.clone())
                .collect();
            cycle.push(tree.get(id).identity.clone());
            return cycle;
        }
        path.push(id);
        current = smallest_identity(
            tree,
            graph
                .prerequisites(id)
                .iter()
                .copied()
                .filter(|p| pending.contains(p)),
        );
    }

    path.iter().map(|id| tree.get(*id).identity.clone()).collect()
}

fn smallest_identity(
    tree: &ComponentTree,
    ids: impl Iterator<Item = ComponentId>,
) -> Option<ComponentId> {
    ids.min_by(|a, b| tree.get(*a).identity.cmp(&tree.get(*b).identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComponentConfig;
    use std::path::Path;

    fn needs(list: &[&str]) -> ComponentConfig {
        ComponentConfig {
            needs: list.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn build(children: Vec<(&str, ComponentConfig)>) -> (ComponentTree, Result<ExecutionPlan>) {
        let root = ComponentConfig {
            components: children.into_iter().collect(),
            ..Default::default()
        };
        let tree = ComponentTree::build(&root, Path::new("/")).unwrap();
        let graph = DependencyGraph::build(&tree).unwrap();
        let plan = plan(&tree, &graph);
        (tree, plan)
    }

    fn names(tree: &ComponentTree, plan: &ExecutionPlan) -> Vec<Vec<String>> {
        plan.batches()
            .iter()
            .map(|b| b.iter().map(|id| tree.get(*id).identity.clone()).collect())
            .collect()
    }

    #[test]
    fn diamond_is_layered() {
        let (tree, plan) = build(vec![
            ("a", needs(&[])),
            ("b", needs(&["a"])),
            ("c", needs(&["a"])),
            ("d", needs(&["b", "c"])),
        ]);
        let plan = plan.unwrap();

        assert_eq!(
            names(&tree, &plan),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn batches_are_sorted_by_identity() {
        let (tree, plan) = build(vec![("zeta", needs(&[])), ("alpha", needs(&[])), ("mid", needs(&[]))]);
        assert_eq!(names(&tree, &plan.unwrap()), vec![vec!["alpha", "mid", "zeta"]]);
    }

    #[test]
    fn components_land_in_earliest_possible_batch() {
        let (tree, plan) = build(vec![
            ("a", needs(&[])),
            ("b", needs(&["a"])),
            ("c", needs(&["b"])),
            ("d", needs(&["a"])),
            ("e", needs(&[])),
        ]);
        assert_eq!(
            names(&tree, &plan.unwrap()),
            vec![vec!["a", "e"], vec!["b", "d"], vec!["c"]]
        );
    }

    #[test]
    fn two_node_cycle_is_reported() {
        let (_, plan) = build(vec![("a", needs(&["b"])), ("b", needs(&["a"]))]);
        let err = plan.unwrap_err();

        assert_eq!(err.code.as_str(), "dependency.cycle");
        assert_eq!(err.details["cycle"], serde_json::json!(["a", "b", "a"]));
        assert!(err.message.contains("a -> b -> a"));
    }

    #[test]
    fn self_need_is_a_cycle() {
        let (_, plan) = build(vec![("a", needs(&["a"]))]);
        assert_eq!(plan.unwrap_err().details["cycle"], serde_json::json!(["a", "a"]));
    }

    #[test]
    fn cycle_reported_excludes_unrelated_components() {
        let (tree, plan) = build(vec![
            ("root", needs(&[])),
            ("x", needs(&["root", "z"])),
            ("y", needs(&["x"])),
            ("z", needs(&["y"])),
            ("tail", needs(&["z"])),
        ]);
        let err = plan.unwrap_err();
        let cycle: Vec<String> = serde_json::from_value(err.details["cycle"].clone()).unwrap();

        assert_eq!(cycle.first(), cycle.last());
        assert!(!cycle.contains(&"tail".to_string()));
        assert!(!cycle.contains(&"root".to_string()));
        // Each step needs the next one.
        for pair in cycle.windows(2) {
            let from = tree.find(&pair[0]).unwrap();
            let to = tree.find(&pair[1]).unwrap();
            assert!(tree.get(from).needs.contains(&tree.get(to).identity));
        }
    }

    #[test]
    fn child_needing_its_parent_is_a_cycle() {
        let group = ComponentConfig {
            components: vec![("api", needs(&["app"]))].into_iter().collect(),
            ..Default::default()
        };
        let (_, plan) = build(vec![("app", group)]);
        assert_eq!(
            plan.unwrap_err().details["cycle"],
            serde_json::json!(["app", "app.api", "app"])
        );
    }

    #[test]
    fn grouping_node_follows_its_subtree() {
        let group = ComponentConfig {
            components: vec![("db", needs(&[])), ("api", needs(&["db"]))]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let (tree, plan) = build(vec![("app", group), ("smoke", needs(&["app"]))]);
        assert_eq!(
            names(&tree, &plan.unwrap()),
            vec![vec!["app.db"], vec!["app.api"], vec!["app"], vec!["smoke"]]
        );
    }

    #[test]
    fn group_needing_its_nested_group_is_schedulable() {
        let db = ComponentConfig {
            components: vec![("migrate", needs(&[]))].into_iter().collect(),
            ..Default::default()
        };
        let group = ComponentConfig {
            needs: vec!["app.db".to_string()],
            components: vec![("db", db), ("api", needs(&[]))].into_iter().collect(),
            ..Default::default()
        };
        let (tree, plan) = build(vec![("app", group)]);
        assert_eq!(
            names(&tree, &plan.unwrap()),
            vec![
                vec!["app.db.migrate"],
                vec!["app.db"],
                vec!["app.api"],
                vec!["app"]
            ]
        );
    }

    #[test]
    fn empty_tree_has_no_batches() {
        let (_, plan) = build(Vec::new());
        assert!(plan.unwrap().is_empty());
    }
}
