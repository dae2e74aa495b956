//! DAG validation — run this before persisting or executing a workflow.
//!
//! Rules enforced, in order:
//! 1. `tasks` is non-empty.
//! 2. `task_id` uniqueness.
//! 3. Every dependency references known task_ids.
//! 4. The induced digraph is acyclic (Kahn's topological sort consumes every
//!    node).
//! 5. Every branch target resolves to a known task_id *and* is reachable via
//!    a declared dependency edge from the branching node.
//! 6. `loop.foreach` is non-empty when present.
//!
//! Returns a topologically-sorted list of task_ids on success.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{models::DagDocument, EngineError};

/// Validate a DAG document and return its tasks in topological execution
/// order.
pub fn validate_dag(dag: &DagDocument) -> Result<Vec<String>, EngineError> {
    if dag.tasks.is_empty() {
        return Err(EngineError::EmptyDag);
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for task in &dag.tasks {
        if !seen_ids.insert(task.task_id.as_str()) {
            return Err(EngineError::DuplicateTaskId(task.task_id.clone()));
        }
    }

    let task_set: HashSet<&str> = dag.tasks.iter().map(|t| t.task_id.as_str()).collect();

    for dep in &dag.dependencies {
        if !task_set.contains(dep.upstream.as_str()) {
            return Err(EngineError::UnknownTaskReference {
                task_id: dep.upstream.clone(),
                side: "upstream",
            });
        }
        if !task_set.contains(dep.downstream.as_str()) {
            return Err(EngineError::UnknownTaskReference {
                task_id: dep.downstream.clone(),
                side: "downstream",
            });
        }
    }

    // Topological sort (Kahn's algorithm).
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for task in &dag.tasks {
        adjacency.entry(task.task_id.as_str()).or_default();
        in_degree.entry(task.task_id.as_str()).or_insert(0);
    }

    for dep in &dag.dependencies {
        adjacency
            .entry(dep.upstream.as_str())
            .or_default()
            .push(dep.downstream.as_str());
        *in_degree.entry(dep.downstream.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(dag.tasks.len());
    let mut remaining_in_degree = in_degree.clone();

    while let Some(task_id) = queue.pop_front() {
        sorted.push(task_id.to_owned());

        if let Some(neighbours) = adjacency.get(task_id) {
            for &neighbour in neighbours {
                let deg = remaining_in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    if sorted.len() != dag.tasks.len() {
        return Err(EngineError::CycleDetected);
    }

    // Branch target validation: every branch child must be a known task_id
    // reachable via a declared dependency edge from the branching node.
    let mut declared_edges: HashSet<(&str, &str)> = HashSet::new();
    for dep in &dag.dependencies {
        declared_edges.insert((dep.upstream.as_str(), dep.downstream.as_str()));
    }

    for task in &dag.tasks {
        if let Some(branches) = &task.branches {
            for children in branches.values() {
                for child in children {
                    if !task_set.contains(child.as_str()) {
                        return Err(EngineError::UnknownBranchTarget {
                            task_id: task.task_id.clone(),
                            target: child.clone(),
                        });
                    }
                    if !declared_edges.contains(&(task.task_id.as_str(), child.as_str())) {
                        return Err(EngineError::BranchTargetMissingDependency {
                            task_id: task.task_id.clone(),
                            target: child.clone(),
                        });
                    }
                }
            }
        }

        if let Some(loop_spec) = &task.loop_spec {
            if loop_spec.foreach.is_empty() {
                return Err(EngineError::EmptyLoopForeach {
                    task_id: task.task_id.clone(),
                });
            }
        }
    }

    Ok(sorted)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dependency, LoopSpec, TaskNode, TriggerRule};
    use serde_json::json;
    use std::collections::HashMap;

    fn make_task(id: &str) -> TaskNode {
        TaskNode {
            task_id: id.to_string(),
            task_type: "echo".into(),
            params: json!({}),
            retries: 0,
            retry_delay: 1,
            timeout: None,
            trigger_rule: TriggerRule::default(),
            condition: None,
            branches: None,
            loop_spec: None,
        }
    }

    fn make_dag(tasks: Vec<TaskNode>, dependencies: Vec<Dependency>) -> DagDocument {
        DagDocument { tasks, dependencies }
    }

    fn dep(upstream: &str, downstream: &str) -> Dependency {
        Dependency {
            upstream: upstream.into(),
            downstream: downstream.into(),
        }
    }

    #[test]
    fn empty_dag_is_rejected() {
        let dag = make_dag(vec![], vec![]);
        assert!(matches!(validate_dag(&dag), Err(EngineError::EmptyDag)));
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        let dag = make_dag(
            vec![make_task("a"), make_task("b"), make_task("c")],
            vec![dep("a", "b"), dep("b", "c")],
        );
        let sorted = validate_dag(&dag).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        let dag = make_dag(
            vec![make_task("a"), make_task("b"), make_task("c"), make_task("d")],
            vec![dep("a", "b"), dep("a", "c"), dep("b", "d"), dep("c", "d")],
        );
        let sorted = validate_dag(&dag).expect("should be valid");
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn duplicate_task_id_is_rejected() {
        let dag = make_dag(vec![make_task("a"), make_task("a")], vec![]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::DuplicateTaskId(id)) if id == "a"
        ));
    }

    #[test]
    fn dependency_referencing_missing_task_is_rejected() {
        let dag = make_dag(vec![make_task("a")], vec![dep("a", "ghost")]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::UnknownTaskReference { task_id, .. }) if task_id == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        let dag = make_dag(
            vec![make_task("a"), make_task("b"), make_task("c")],
            vec![dep("a", "b"), dep("b", "c"), dep("c", "a")],
        );
        assert!(matches!(validate_dag(&dag), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn single_task_no_dependencies_is_valid() {
        let dag = make_dag(vec![make_task("solo")], vec![]);
        let sorted = validate_dag(&dag).expect("single task should be valid");
        assert_eq!(sorted, vec!["solo"]);
    }

    #[test]
    fn branch_target_without_dependency_edge_is_rejected() {
        let mut t1 = make_task("t1");
        let mut branches = HashMap::new();
        branches.insert("ok".to_string(), vec!["t2".to_string()]);
        t1.branches = Some(branches);

        // t2 exists but no dependency edge t1 -> t2 was declared.
        let dag = make_dag(vec![t1, make_task("t2")], vec![]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::BranchTargetMissingDependency { .. })
        ));
    }

    #[test]
    fn branch_target_referencing_unknown_task_is_rejected() {
        let mut t1 = make_task("t1");
        let mut branches = HashMap::new();
        branches.insert("ok".to_string(), vec!["ghost".to_string()]);
        t1.branches = Some(branches);

        let dag = make_dag(vec![t1], vec![]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::UnknownBranchTarget { .. })
        ));
    }

    #[test]
    fn valid_branch_with_declared_edge_passes() {
        let mut t1 = make_task("t1");
        let mut branches = HashMap::new();
        branches.insert("ok".to_string(), vec!["t2".to_string()]);
        branches.insert("err".to_string(), vec!["t3".to_string()]);
        t1.branches = Some(branches);

        let dag = make_dag(
            vec![t1, make_task("t2"), make_task("t3")],
            vec![dep("t1", "t2"), dep("t1", "t3")],
        );
        assert!(validate_dag(&dag).is_ok());
    }

    #[test]
    fn empty_loop_foreach_is_rejected() {
        let mut t1 = make_task("t1");
        t1.loop_spec = Some(LoopSpec { foreach: vec![] });
        let dag = make_dag(vec![t1], vec![]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::EmptyLoopForeach { .. })
        ));
    }
}
