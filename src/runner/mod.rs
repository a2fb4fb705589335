//! Parallel Workflow Runner: drives a [`WorkflowGraph`] level by level,
//! dispatching each level's ready nodes concurrently and merging their
//! event streams upward (spec.md §4.6).

use crate::a2a::{A2aError, Event};
use crate::graph::{NodeState, WorkflowGraph};
use crate::{OrchestratorError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An event annotated with the node that produced it, as delivered to the
/// Orchestrator's merged stream (spec.md §4.6 step 3).
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub node_id: String,
    pub event: Result<Event, A2aError>,
}

/// Dispatches one node's work, returning a channel of its events. Typically
/// backed by [`crate::a2a::A2aClient::stream`].
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        node_id: &str,
        agent_id: &str,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<Event, A2aError>>>;
}

/// Below this many ready nodes, a level is dispatched sequentially rather
/// than via `tokio::spawn`, since the parallel path's overhead would not
/// be worth paying (spec.md §4.6 "pure optimization, observable only in
/// latency").
const DEFAULT_MIN_PARALLEL_NODES: usize = 2;

pub struct RunnerConfig {
    pub min_parallel_nodes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            min_parallel_nodes: DEFAULT_MIN_PARALLEL_NODES,
        }
    }
}

/// Outcome of draining one level.
pub enum LevelOutcome {
    /// All of the level's nodes reached a terminal state.
    Drained,
    /// At least one node suspended on `InputRequired`; the caller must
    /// resume it (with [`ParallelRunner::resume`]) before the level can
    /// finish draining.
    AwaitingInput { node_ids: Vec<String> },
}

/// Outcome of [`ParallelRunner::run`] draining every runnable level.
pub enum RunOutcome {
    /// No level is runnable anymore: either the graph is fully terminal,
    /// or the remaining nodes are unreachable.
    Drained,
    /// A level suspended on `InputRequired` before the graph finished;
    /// the caller (the Orchestrator) must pause the session and resume
    /// the named nodes via [`ParallelRunner::resume`] before further
    /// levels can run.
    AwaitingInput { node_ids: Vec<String> },
}

pub struct ParallelRunner<D: Dispatcher> {
    graph: Arc<Mutex<WorkflowGraph>>,
    dispatcher: Arc<D>,
    config: RunnerConfig,
}

impl<D: Dispatcher + 'static> ParallelRunner<D> {
    pub fn new(graph: Arc<Mutex<WorkflowGraph>>, dispatcher: Arc<D>, config: RunnerConfig) -> Self {
        Self {
            graph,
            dispatcher,
            config,
        }
    }

    /// Run every level of the graph to completion (or until cancelled),
    /// forwarding annotated events on `out`. Recomputes the execution plan
    /// before each level, since the Orchestrator may add nodes between
    /// levels (spec.md §4.6 step 6, §4.8 DYNAMIC_ADJUSTMENT).
    pub async fn run(&self, out: mpsc::Sender<NodeEvent>, cancel: CancellationToken) -> Result<RunOutcome> {
        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let level = {
                let graph = self.graph.lock().await;
                graph
                    .get_execution_plan()
                    .into_iter()
                    .find(|level| {
                        level.iter().any(|id| {
                            graph
                                .get(id)
                                .map(|n| matches!(n.state, NodeState::Pending | NodeState::Ready))
                                .unwrap_or(false)
                        })
                    })
            };

            let Some(level) = level else {
                debug!("no more runnable levels; runner finished");
                return Ok(RunOutcome::Drained);
            };

            match self.run_level(&level, out.clone(), cancel.clone()).await? {
                LevelOutcome::Drained => continue,
                LevelOutcome::AwaitingInput { node_ids } => {
                    info!(?node_ids, "level suspended awaiting input");
                    return Ok(RunOutcome::AwaitingInput { node_ids });
                }
            }
        }
    }

    async fn run_level(
        &self,
        level: &[String],
        out: mpsc::Sender<NodeEvent>,
        cancel: CancellationToken,
    ) -> Result<LevelOutcome> {
        let sequential = level.len() < self.config.min_parallel_nodes;
        let (merge_tx, mut merge_rx) = mpsc::channel(128);
        let mut awaiting_input = Vec::new();
        let mut handles = Vec::new();

        for node_id in level {
            let (agent_id, input) = {
                let mut graph = self.graph.lock().await;
                let node = graph
                    .get(node_id)
                    .ok_or_else(|| OrchestratorError::NotFound(node_id.clone()))?;
                let agent_id = node.agent_id.clone();
                let input = node.input.clone();
                graph.state_transition(node_id, NodeState::Running)?;
                (agent_id, input)
            };

            let dispatcher = self.dispatcher.clone();
            let node_id = node_id.clone();
            let merge_tx = merge_tx.clone();
            let cancel = cancel.clone();

            let task = async move {
                let receiver = dispatcher.dispatch(&node_id, &agent_id, input, cancel.clone()).await;
                match receiver {
                    Ok(mut events) => {
                        while let Some(event) = events.recv().await {
                            if merge_tx
                                .send(NodeEvent {
                                    node_id: node_id.clone(),
                                    event,
                                })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    Err(_) if cancel.is_cancelled() => {
                        // The session is cancelling; this node is folded
                        // into CANCELLED by the level's own cleanup below,
                        // not surfaced as a per-node transport failure
                        // (spec.md §7 Cancelled: one envelope, no further
                        // events).
                    }
                    Err(e) => {
                        let _ = merge_tx
                            .send(NodeEvent {
                                node_id: node_id.clone(),
                                event: Err(A2aError::Protocol(e.to_string())),
                            })
                            .await;
                    }
                }
            };

            if sequential {
                task.await;
            } else {
                handles.push(tokio::spawn(task));
            }
        }
        drop(merge_tx);

        let mut outstanding: HashMap<String, ()> = level.iter().map(|id| (id.clone(), ())).collect();

        while !outstanding.is_empty() {
            let node_event = tokio::select! {
                _ = cancel.cancelled() => None,
                ev = merge_rx.recv() => ev,
            };
            let Some(node_event) = node_event else {
                break;
            };

            let is_final = match &node_event.event {
                Ok(event) => event.is_final(),
                Err(_) => true,
            };
            let is_input_required = matches!(node_event.event, Ok(Event::InputRequired { .. }));

            if is_input_required {
                let mut graph = self.graph.lock().await;
                graph.state_transition(&node_event.node_id, NodeState::InputRequired)?;
                awaiting_input.push(node_event.node_id.clone());
                outstanding.remove(&node_event.node_id);
            } else if is_final {
                let mut graph = self.graph.lock().await;
                let new_state = match &node_event.event {
                    Ok(Event::Error { .. }) | Err(_) => NodeState::Failed,
                    _ => NodeState::Completed,
                };
                if let Some(node) = graph.get_mut(&node_event.node_id) {
                    if let Ok(Event::StreamingResponse { parts, .. }) = &node_event.event {
                        node.result = Some(serde_json::json!({
                            "parts": parts.iter().map(|p| p.as_text()).collect::<Vec<_>>()
                        }));
                    }
                    if let Err(e) = &node_event.event {
                        node.error = Some(e.to_string());
                    }
                }
                graph.state_transition(&node_event.node_id, new_state)?;
                outstanding.remove(&node_event.node_id);
            }

            if out.send(node_event).await.is_err() {
                warn!("downstream consumer dropped; cancelling runner");
                cancel.cancel();
                break;
            }
        }

        // Cancellation (or a downstream-consumer drop) can leave nodes
        // neither terminal nor dispatched-to-completion; force them to
        // CANCELLED so no node is ever left RUNNING (spec.md §5, §8).
        if !outstanding.is_empty() {
            let mut graph = self.graph.lock().await;
            for id in outstanding.keys() {
                let _ = graph.state_transition(id, NodeState::Cancelled);
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        if awaiting_input.is_empty() {
            Ok(LevelOutcome::Drained)
        } else {
            Ok(LevelOutcome::AwaitingInput { node_ids: awaiting_input })
        }
    }

    /// Resume a node suspended on `InputRequired` by appending `input` to
    /// its message and re-dispatching it (spec.md §4.6 step 5).
    pub async fn resume(
        &self,
        node_id: &str,
        input: serde_json::Value,
        out: mpsc::Sender<NodeEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        {
            let mut graph = self.graph.lock().await;
            let node = graph
                .get_mut(node_id)
                .ok_or_else(|| OrchestratorError::NotFound(node_id.to_string()))?;
            if let Some(obj) = node.input.as_object_mut() {
                obj.insert("resumed_input".to_string(), input);
            }
            graph.state_transition(node_id, NodeState::Ready)?;
        }
        self.run_level(&[node_id.to_string()], out, cancel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::WorkflowNode;
    use serde_json::json;
    use std::time::Duration;

    struct EchoDispatcher;

    #[async_trait::async_trait]
    impl Dispatcher for EchoDispatcher {
        async fn dispatch(
            &self,
            node_id: &str,
            _agent_id: &str,
            _input: serde_json::Value,
            _cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<Result<Event, A2aError>>> {
            let (tx, rx) = mpsc::channel(4);
            let node_id = node_id.to_string();
            tokio::spawn(async move {
                let _ = tx
                    .send(Ok(Event::StreamingResponse {
                        task_id: node_id,
                        parts: vec![crate::a2a::MessagePart::text("done")],
                        is_final: true,
                    }))
                    .await;
            });
            Ok(rx)
        }
    }

    fn node(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, format!("task-{id}"), "agent-1", json!({}))
    }

    #[tokio::test]
    async fn drains_a_single_level_to_completion() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(node("a"));
        graph.add_node(node("b"));
        let graph = Arc::new(Mutex::new(graph));

        let runner = ParallelRunner::new(graph.clone(), Arc::new(EchoDispatcher), RunnerConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        tokio::spawn(async move {
            runner.run(tx, cancel).await.unwrap();
        });

        let mut seen = 0;
        while rx.recv().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 2);

        let graph = graph.lock().await;
        assert_eq!(graph.get("a").unwrap().state, NodeState::Completed);
        assert_eq!(graph.get("b").unwrap().state, NodeState::Completed);
    }

    #[tokio::test]
    async fn sequential_path_used_below_min_parallel_nodes() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(node("solo"));
        let graph = Arc::new(Mutex::new(graph));

        let runner = ParallelRunner::new(graph.clone(), Arc::new(EchoDispatcher), RunnerConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        runner.run(tx, CancellationToken::new()).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.node_id, "solo");
    }

    struct InputRequiredDispatcher;

    #[async_trait::async_trait]
    impl Dispatcher for InputRequiredDispatcher {
        async fn dispatch(
            &self,
            node_id: &str,
            _agent_id: &str,
            _input: serde_json::Value,
            _cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<Result<Event, A2aError>>> {
            let (tx, rx) = mpsc::channel(4);
            let node_id = node_id.to_string();
            tokio::spawn(async move {
                let _ = tx
                    .send(Ok(Event::InputRequired {
                        task_id: node_id,
                        prompt: "which region?".to_string(),
                    }))
                    .await;
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn run_reports_awaiting_input_and_leaves_the_node_suspended() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(node("a"));
        let graph = Arc::new(Mutex::new(graph));

        let runner = ParallelRunner::new(graph.clone(), Arc::new(InputRequiredDispatcher), RunnerConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        let outcome = runner.run(tx, CancellationToken::new()).await.unwrap();

        assert!(rx.recv().await.is_some());
        match outcome {
            RunOutcome::AwaitingInput { node_ids } => assert_eq!(node_ids, vec!["a".to_string()]),
            RunOutcome::Drained => panic!("expected AwaitingInput"),
        }
        assert_eq!(graph.lock().await.get("a").unwrap().state, NodeState::InputRequired);
    }

    /// Mimics `A2aClient::stream`'s own behavior: blocks until cancelled,
    /// then fails the dispatch the same way a cancelled connect attempt
    /// would (spec.md §4.2 "cancellation ... aborts the underlying HTTP
    /// read").
    struct HangingDispatcher;

    #[async_trait::async_trait]
    impl Dispatcher for HangingDispatcher {
        async fn dispatch(
            &self,
            _node_id: &str,
            _agent_id: &str,
            _input: serde_json::Value,
            cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<Result<Event, A2aError>>> {
            cancel.cancelled().await;
            Err(OrchestratorError::A2a(A2aError::Cancelled))
        }
    }

    #[tokio::test]
    async fn cancelling_mid_dispatch_marks_every_outstanding_node_cancelled() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(node("a"));
        graph.add_node(node("b"));
        let graph = Arc::new(Mutex::new(graph));

        let runner = ParallelRunner::new(graph.clone(), Arc::new(HangingDispatcher), RunnerConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(tx, run_cancel).await });
        // Give the spawned run loop a chance to transition both nodes to
        // RUNNING and reach the (hanging) dispatch call before cancelling,
        // so this exercises a genuinely in-flight cancellation rather than
        // one that beats the runner out of the gate.
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();

        assert!(matches!(outcome, Err(OrchestratorError::Cancelled)));
        assert!(rx.recv().await.is_none(), "no per-node envelope should surface a cancelled dispatch");

        let graph = graph.lock().await;
        assert_eq!(graph.get("a").unwrap().state, NodeState::Cancelled);
        assert_eq!(graph.get("b").unwrap().state, NodeState::Cancelled);
        assert!(graph.get("a").unwrap().completed_at.is_some());
    }

    #[tokio::test]
    async fn resume_redispatches_a_suspended_node_to_completion() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(node("a"));
        let graph = Arc::new(Mutex::new(graph));
        graph.lock().await.state_transition("a", NodeState::Running).unwrap();
        graph.lock().await.state_transition("a", NodeState::InputRequired).unwrap();

        let runner = ParallelRunner::new(graph.clone(), Arc::new(EchoDispatcher), RunnerConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        runner
            .resume("a", json!({"region": "eu"}), tx, CancellationToken::new())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.event, Ok(Event::StreamingResponse { is_final: true, .. })));
        assert_eq!(graph.lock().await.get("a").unwrap().state, NodeState::Completed);
    }
}
