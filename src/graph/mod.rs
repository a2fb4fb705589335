//! Workflow Graph: a mutable DAG of task nodes, owned by one Session and
//! mutated only by the Orchestrator/Runner for that session (spec.md §4.5).
//!
//! Node/edge shape is carried over from the reference `WorkflowNode`/
//! `WorkflowEdge` (`execution/workflow_engine.rs`), generalized from a
//! single `current_node` + string `status` walk to a graph that tracks
//! every node's state and can compute BFS-level execution plans for
//! genuine parallel dispatch.

use crate::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Lifecycle state of one workflow node (spec.md §4.5, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    InputRequired,
    Completed,
    Failed,
    Cancelled,
}

impl NodeState {
    /// Whether `self -> next` is a legal transition. Monotonic in the
    /// listed order except through `InputRequired`, which may return to
    /// `Ready`/`Running` (spec.md §4.5 "state transitions monotonic except
    /// through INPUT_REQUIRED").
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        match (self, next) {
            (a, b) if a == b => false,
            (_, Cancelled) => true,
            (InputRequired, Ready) | (InputRequired, Running) | (InputRequired, Failed) => true,
            (Pending, Ready) | (Pending, Running) | (Pending, Failed) => true,
            (Ready, Running) | (Ready, Failed) => true,
            (Running, InputRequired) | (Running, Completed) | (Running, Failed) => true,
            _ => false,
        }
    }
}

/// One unit of dispatchable work in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub input: Value,
    pub state: NodeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set the first time the node passes READY; never reset on a
    /// RUNNING→INPUT_REQUIRED→RUNNING round trip (spec.md §4.5).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff state is one of COMPLETED/FAILED/CANCELLED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, task_id: impl Into<String>, agent_id: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            input,
            state: NodeState::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }
}

/// Serializable point-in-time statistics (spec.md §4.5 `snapshot()`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub node_count: usize,
    pub edge_count: usize,
    pub by_state: HashMap<String, usize>,
}

/// A mutable DAG of [`WorkflowNode`]s.
#[derive(Debug, Default)]
pub struct WorkflowGraph {
    nodes: HashMap<String, WorkflowNode>,
    /// pred -> [succ]
    edges: HashMap<String, Vec<String>>,
    /// succ -> [pred], kept for `get_ready_nodes`.
    predecessors: HashMap<String, Vec<String>>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: WorkflowNode) -> String {
        let id = node.id.clone();
        self.edges.entry(id.clone()).or_default();
        self.predecessors.entry(id.clone()).or_default();
        self.nodes.insert(id.clone(), node);
        id
    }

    /// Rejects an edge whose insertion would introduce a cycle, detected by
    /// DFS from `succ_id` looking for `pred_id` (spec.md §4.5).
    pub fn add_edge(&mut self, pred_id: &str, succ_id: &str) -> Result<()> {
        if !self.nodes.contains_key(pred_id) {
            return Err(OrchestratorError::NotFound(pred_id.to_string()));
        }
        if !self.nodes.contains_key(succ_id) {
            return Err(OrchestratorError::NotFound(succ_id.to_string()));
        }
        if self.path_exists(succ_id, pred_id) {
            return Err(OrchestratorError::CycleDetected {
                from: pred_id.to_string(),
                to: succ_id.to_string(),
            });
        }
        self.edges.entry(pred_id.to_string()).or_default().push(succ_id.to_string());
        self.predecessors.entry(succ_id.to_string()).or_default().push(pred_id.to_string());
        Ok(())
    }

    fn path_exists(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(successors) = self.edges.get(&current) {
                stack.extend(successors.iter().cloned());
            }
        }
        false
    }

    /// Removing a node with successors also removes the dangling edges
    /// (spec.md §4.5 invariant).
    pub fn remove_node(&mut self, id: &str) {
        self.nodes.remove(id);
        let successors = self.edges.remove(id).unwrap_or_default();
        self.predecessors.remove(id);
        for succ in &successors {
            if let Some(preds) = self.predecessors.get_mut(succ) {
                preds.retain(|p| p != id);
            }
        }
        for preds in self.predecessors.values_mut() {
            preds.retain(|p| p != id);
        }
        for succs in self.edges.values_mut() {
            succs.retain(|s| s != id);
        }
    }

    /// Nodes in PENDING/READY with all predecessors COMPLETED.
    pub fn get_ready_nodes(&self) -> Vec<&WorkflowNode> {
        self.nodes
            .values()
            .filter(|n| matches!(n.state, NodeState::Pending | NodeState::Ready))
            .filter(|n| self.predecessors_completed(&n.id))
            .collect()
    }

    fn predecessors_completed(&self, id: &str) -> bool {
        self.predecessors
            .get(id)
            .map(|preds| {
                preds.iter().all(|p| {
                    self.nodes
                        .get(p)
                        .map(|n| n.state == NodeState::Completed)
                        .unwrap_or(true)
                })
            })
            .unwrap_or(true)
    }

    /// BFS levels: nodes at distance k from sources that have no
    /// outstanding dependency after level k-1 completes (spec.md §4.5).
    pub fn get_execution_plan(&self) -> Vec<Vec<String>> {
        let mut remaining: HashSet<String> = self.nodes.keys().cloned().collect();
        let mut satisfied: HashSet<String> = HashSet::new();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let level: Vec<String> = remaining
                .iter()
                .filter(|id| {
                    self.predecessors
                        .get(*id)
                        .map(|preds| preds.iter().all(|p| satisfied.contains(p) || !remaining.contains(p)))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();

            if level.is_empty() {
                // Remaining nodes are unreachable (e.g. orphaned after a
                // partial removal); stop rather than loop forever.
                break;
            }

            for id in &level {
                remaining.remove(id);
                satisfied.insert(id.clone());
            }
            levels.push(level);
        }

        levels
    }

    /// Validates monotonicity before applying the transition.
    pub fn state_transition(&mut self, id: &str, new_state: NodeState) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        if !node.state.can_transition_to(new_state) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: format!("{:?}", node.state),
                to: format!("{:?}", new_state),
            });
        }
        node.state = new_state;
        if new_state == NodeState::Running && node.started_at.is_none() {
            node.started_at = Some(Utc::now());
        }
        if matches!(new_state, NodeState::Completed | NodeState::Failed | NodeState::Cancelled) {
            node.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let mut by_state = HashMap::new();
        for node in self.nodes.values() {
            *by_state.entry(format!("{:?}", node.state)).or_insert(0) += 1;
        }
        GraphSnapshot {
            node_count: self.nodes.len(),
            edge_count: self.edges.values().map(|v| v.len()).sum(),
            by_state,
        }
    }
}
