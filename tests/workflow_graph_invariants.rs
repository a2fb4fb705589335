//! Property tests for the Workflow Graph's structural invariants (spec.md
//! §8): acyclicity is enforced on every edge insertion, and node state
//! transitions are monotonic except through `INPUT_REQUIRED`.

use orchestrator::graph::{NodeState, WorkflowGraph, WorkflowNode};
use proptest::prelude::*;

fn node(id: &str) -> WorkflowNode {
    WorkflowNode::new(id, id, "agent", serde_json::json!({}))
}

proptest! {
    /// Inserting a random sequence of edges over a fixed node set never
    /// leaves the graph with a cycle: `add_edge` either succeeds and the
    /// graph stays acyclic, or it is rejected outright.
    #[test]
    fn add_edge_never_introduces_a_cycle(
        edges in prop::collection::vec((0usize..6, 0usize..6), 0..30)
    ) {
        let mut graph = WorkflowGraph::new();
        for i in 0..6 {
            graph.add_node(node(&i.to_string()));
        }

        for (from, to) in edges {
            if from == to {
                continue;
            }
            let from = from.to_string();
            let to = to.to_string();
            let accepted = graph.add_edge(&from, &to).is_ok();
            if accepted {
                // An edge that was accepted must not create a path back
                // from its successor to its predecessor.
                prop_assert!(graph.add_edge(&to, &from).is_err());
            }
        }
    }

    /// The BFS execution plan never places a node before all of its
    /// predecessors, for any acyclic edge set built through `add_edge`.
    #[test]
    fn execution_plan_respects_dependency_order(
        edges in prop::collection::vec((0usize..5, 0usize..5), 0..15)
    ) {
        let mut graph = WorkflowGraph::new();
        for i in 0..5 {
            graph.add_node(node(&i.to_string()));
        }
        let mut accepted_edges = Vec::new();
        for (from, to) in edges {
            if from == to {
                continue;
            }
            let from = from.to_string();
            let to = to.to_string();
            if graph.add_edge(&from, &to).is_ok() {
                accepted_edges.push((from, to));
            }
        }

        let plan = graph.get_execution_plan();
        let mut level_of = std::collections::HashMap::new();
        for (level_idx, level) in plan.iter().enumerate() {
            for id in level {
                level_of.insert(id.clone(), level_idx);
            }
        }

        for (pred, succ) in &accepted_edges {
            if let (Some(&pred_level), Some(&succ_level)) = (level_of.get(pred), level_of.get(succ)) {
                prop_assert!(pred_level < succ_level);
            }
        }
    }
}

#[test]
fn state_transitions_are_monotonic_except_through_input_required() {
    let mut graph = WorkflowGraph::new();
    graph.add_node(node("n1"));

    assert!(graph.state_transition("n1", NodeState::Ready).is_ok());
    assert!(graph.state_transition("n1", NodeState::Running).is_ok());
    assert!(graph.state_transition("n1", NodeState::InputRequired).is_ok());
    // INPUT_REQUIRED may return to RUNNING, unlike any other backward hop.
    assert!(graph.state_transition("n1", NodeState::Running).is_ok());
    assert!(graph.state_transition("n1", NodeState::Completed).is_ok());
    // A terminal state never transitions onward.
    assert!(graph.state_transition("n1", NodeState::Failed).is_err());
}

#[test]
fn removing_a_node_with_successors_drops_dangling_edges() {
    let mut graph = WorkflowGraph::new();
    graph.add_node(node("a"));
    graph.add_node(node("b"));
    graph.add_edge("a", "b").unwrap();

    graph.remove_node("a");

    let plan = graph.get_execution_plan();
    let all_ids: Vec<&String> = plan.iter().flatten().collect();
    assert_eq!(all_ids, vec!["b"]);
}
